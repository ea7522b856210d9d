//! Stream state machine: client admission, parameter dispatch, producer
//! lifecycle, teardown fan-out.
//!
//! One [`Stream`] owns one frontend, one [`PidTable`] + [`StreamProperties`]
//! pair behind a single mutex, up to [`MAX_CLIENTS`] client slots behind an
//! `RwLock`, and the two worker threads ([`RtpProducer`], [`RtcpSidecar`]).
//!
//! ## Lifecycle
//!
//! ```text
//! idle ──find_client_id_for──▶ in use ──PLAY/update──▶ active
//!   ▲                                                    │
//!   └── slot-0 teardown / watchdog sweep ◀───────────────┘
//! ```
//!
//! Slot 0 is the owner: the session that tuned the frontend. Its teardown
//! cascades non-gracefully to every companion slot. Companions share the
//! RTP flow but cannot retune.
//!
//! ## Locking
//!
//! `StreamProperties` and `PidTable` are written by the controller and
//! read (plus per-packet accounting) by the worker threads; every access
//! goes through the one stream mutex, held only across short sections.
//! The packet-buffer ring is owned entirely by the producer thread and
//! needs no lock.

pub mod client;
pub mod producer;
pub mod properties;
pub mod rtcp;
pub mod sink;

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::{MonotonicClock, TickSource};
use crate::descramble::{Descrambler, NullDescrambler};
use crate::dvb::frontend::Frontend;
use crate::dvb::tuning::{
    DeliverySystem, FecCode, GuardInterval, Modulation, Pilot, Polarization, RollOff,
    TransmissionMode,
};
use crate::error::{Result, StreamError};
use crate::mpegts::{ALL_PIDS, PidTable};
use crate::protocol::RtspRequest;
use crate::protocol::params::{self, PidList};

pub use client::{SESSION_NONE, StreamClient};
pub use producer::RtpProducer;
pub use properties::{ChannelData, StreamProperties};
pub use rtcp::RtcpSidecar;
pub use sink::TsFileSink;

/// Client slots per stream. Slot 0 is the owner.
pub const MAX_CLIENTS: usize = 8;

/// Data shared between the controller and the worker threads, guarded by
/// the stream mutex.
pub struct StreamShared {
    pub properties: StreamProperties,
    pub pids: PidTable,
}

impl StreamShared {
    pub fn new(stream_id: usize) -> Self {
        Self {
            properties: StreamProperties::new(stream_id),
            pids: PidTable::new(),
        }
    }

    /// SAT>IP describe string including the current PID set.
    pub fn describe(&self) -> String {
        self.properties
            .attribute_describe_string(&self.pids.get_pid_csv())
    }
}

pub(crate) type SharedClients = Arc<RwLock<[StreamClient; MAX_CLIENTS]>>;

/// One tuner's streaming session: admission, tuning, delivery.
pub struct Stream {
    stream_id: usize,
    enabled: bool,
    in_use: bool,
    frontend: Box<dyn Frontend>,
    shared: Arc<Mutex<StreamShared>>,
    clients: SharedClients,
    producer: RtpProducer,
    rtcp: RtcpSidecar,
    session_timeout: Duration,
}

impl Stream {
    /// Create an enabled, idle stream with default collaborators (no
    /// descrambler, real monotonic clock).
    pub fn new(stream_id: usize, frontend: Box<dyn Frontend>) -> Self {
        Self::with_collaborators(
            stream_id,
            frontend,
            Arc::new(NullDescrambler),
            MonotonicClock::new(),
        )
    }

    pub fn with_collaborators(
        stream_id: usize,
        frontend: Box<dyn Frontend>,
        descrambler: Arc<dyn Descrambler>,
        clock: Arc<dyn TickSource>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(StreamShared::new(stream_id)));
        let clients: SharedClients = Arc::new(RwLock::new(std::array::from_fn(StreamClient::new)));
        let producer = RtpProducer::new(
            stream_id,
            shared.clone(),
            clients.clone(),
            descrambler,
            clock,
        );
        let rtcp = RtcpSidecar::new(stream_id, shared.clone(), clients.clone());
        Self {
            stream_id,
            enabled: true,
            in_use: false,
            frontend,
            shared,
            clients,
            producer,
            rtcp,
            session_timeout: client::DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Administratively enable or disable the stream. A disabled stream
    /// refuses new sessions; existing ones are unaffected.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Watchdog interval applied to newly admitted clients.
    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.session_timeout = timeout;
    }

    /// Number of occupied client slots.
    pub fn attached_clients(&self) -> usize {
        self.clients.read().iter().filter(|c| !c.is_free()).count()
    }

    /// SAT>IP describe string for the current tuning state.
    pub fn describe(&self) -> String {
        self.shared.lock().describe()
    }

    /// Currently opened PIDs, ascending CSV (or `all`).
    pub fn pid_csv(&self) -> String {
        self.shared.lock().pids.get_pid_csv()
    }

    /// Continuity errors since the last reconciliation baseline.
    pub fn total_cc_errors(&self) -> u32 {
        self.shared.lock().pids.get_total_cc_errors()
    }

    /// Install a raw TS file sink capturing everything the clients get.
    pub fn set_ts_file_sink(&self, path: Option<&Path>) -> Result<()> {
        let sink = match path {
            Some(path) => Some(TsFileSink::create(path)?),
            None => None,
        };
        self.producer.set_file_sink(sink);
        Ok(())
    }

    /// Find (or assign) the client slot for a request.
    ///
    /// A new session requires the stream to be enabled and the frontend
    /// to handle the requested delivery system; it takes the first free
    /// slot. An existing session must match its slot's session ID
    /// exactly. The slot's remote endpoint is refreshed either way.
    pub fn find_client_id_for(
        &mut self,
        request: &RtspRequest,
        remote: IpAddr,
        new_session: bool,
        session_id: &str,
    ) -> Result<usize> {
        if new_session && !self.enabled {
            tracing::info!(stream_id = self.stream_id, "stream not enabled");
            return Err(StreamError::StreamDisabled(self.stream_id));
        }

        let msys = request
            .uri_query()
            .and_then(|q| params::get(q, "msys"))
            .and_then(DeliverySystem::from_token);
        if new_session {
            if let Some(system) = msys {
                if !self.frontend.capable_of(system) {
                    tracing::info!(stream_id = self.stream_id, %system, "cannot handle delivery system");
                    return Err(StreamError::UnsupportedDeliverySystem(system));
                }
            }
        }

        let wanted = if new_session { SESSION_NONE } else { session_id };
        let mut clients = self.clients.write();
        for slot in clients.iter_mut() {
            if slot.session_id() == wanted {
                slot.set_remote(remote);
                slot.set_session_id(session_id);
                slot.set_session_timeout(self.session_timeout);
                self.in_use = true;
                tracing::info!(
                    stream_id = self.stream_id,
                    client_id = slot.client_id(),
                    session_id,
                    "client slot assigned"
                );
                return Ok(slot.client_id());
            }
        }

        tracing::info!(stream_id = self.stream_id, session_id, "no matching client slot");
        Err(if new_session {
            StreamError::NoFreeClientSlot
        } else {
            StreamError::SessionNotFound(session_id.to_string())
        })
    }

    /// Apply a request to the stream: transport parameters, client ports,
    /// CSeq, close eligibility, watchdog.
    pub fn process_request(&mut self, request: &RtspRequest, client_id: usize) -> Result<()> {
        let method = request.method.as_str();

        if matches!(method, "OPTIONS" | "SETUP" | "PLAY") {
            if let Some(query) = request.uri_query() {
                if params::has_transport_parameters(query) {
                    self.apply_transport_parameters(query);
                }
            }
        }

        let mut clients = self.clients.write();
        let client = &mut clients[client_id];

        if let Some(transport) = request.get_header("Transport") {
            if let Some((rtp, rtcp)) = params::client_ports(transport) {
                client.set_rtp_port(rtp);
                client.set_rtcp_port(rtcp);
            }
        }
        if let Some(cseq) = request.cseq() {
            client.set_cseq(cseq);
        }
        if method != "SETUP" {
            let can_close = method == "TEARDOWN" || request.session_id().is_none();
            client.set_can_close(can_close);
        }
        client.restart_watchdog();
        Ok(())
    }

    /// Parse and apply the SAT>IP query parameters under the stream mutex.
    ///
    /// `freq=` is handled first regardless of its position: a new
    /// frequency forgets the previous channel and releases every PID.
    fn apply_transport_parameters(&self, query: &str) {
        let mut shared = self.shared.lock();
        let StreamShared { properties, pids } = &mut *shared;
        let ch = properties.channel_mut();

        if let Some(freq) = params::get_double(query, "freq") {
            ch.initialize();
            pids.clear();
            ch.set_frequency_khz((freq * 1000.0) as u32);
            tracing::debug!(
                stream_id = self.stream_id,
                freq_mhz = freq,
                "new frequency requested, channel data cleared"
            );
        }
        if let Some(sr) = params::get_int(query, "sr") {
            ch.set_symbol_rate(sr as u32 * 1000);
        }
        let msys = params::get(query, "msys").and_then(DeliverySystem::from_token);
        if let Some(system) = msys {
            ch.set_delivery_system(system);
        }
        if let Some(pol) = params::get(query, "pol").and_then(Polarization::from_token) {
            ch.set_polarization(pol);
        }
        if let Some(src) = params::get_int(query, "src") {
            ch.set_diseqc_source(src);
        }
        if let Some(token) = params::get(query, "plts") {
            ch.set_pilot(Pilot::from_token(token));
        }
        if let Some(token) = params::get(query, "ro") {
            ch.set_rolloff(RollOff::from_token(token));
        }
        if let Some(token) = params::get(query, "fec") {
            ch.set_fec(FecCode::from_token(token));
        }
        match params::get(query, "mtype").and_then(Modulation::from_token) {
            Some(modulation) => ch.set_modulation(modulation),
            None => {
                if let Some(system) = msys {
                    ch.set_modulation(Modulation::implied_by(system));
                }
            }
        }
        if let Some(specinv) = params::get_int(query, "specinv") {
            ch.set_spectral_inversion(specinv);
        }
        if let Some(bw) = params::get_double(query, "bw") {
            ch.set_bandwidth_hz((bw * 1_000_000.0) as u32);
        }
        if let Some(token) = params::get(query, "tmode") {
            ch.set_transmission_mode(TransmissionMode::from_token(token));
        }
        if let Some(token) = params::get(query, "gi") {
            ch.set_guard_interval(GuardInterval::from_token(token));
        }
        if let Some(plp) = params::get_int(query, "plp") {
            ch.set_plp_id(plp);
        }
        if let Some(t2id) = params::get_int(query, "t2id") {
            ch.set_t2_system_id(t2id);
        }
        if let Some(sm) = params::get_int(query, "sm") {
            ch.set_siso_miso(sm);
        }

        if let Some(list) = params::get(query, "pids").or_else(|| params::get(query, "addpids")) {
            Self::apply_pid_list(pids, &PidList::parse(list), true);
        }
        if let Some(list) = params::get(query, "delpids") {
            Self::apply_pid_list(pids, &PidList::parse(list), false);
        }
    }

    /// `all` releases every individual PID and toggles the full-TS
    /// sentinel; a plain list toggles its entries.
    fn apply_pid_list(pids: &mut PidTable, list: &PidList, add: bool) {
        match list {
            PidList::All => {
                for pid in 0..ALL_PIDS {
                    pids.set_pid(pid, false);
                }
                pids.set_all_pid(add);
            }
            PidList::Pids(entries) => {
                for &pid in entries {
                    pids.set_pid(pid, add);
                }
            }
        }
    }

    /// Push pending changes to the frontend and (re)start delivery.
    ///
    /// A channel change pauses the producer first so the ring drains,
    /// then retunes and resumes with a fresh DVR handle. The first update
    /// of a session starts the producer and the RTCP sidecar.
    pub fn update(&mut self, client_id: usize) -> Result<()> {
        let changed = self.shared.lock().properties.has_channel_data_changed();

        if changed && self.producer.is_running() {
            self.producer.pause_streaming()?;
        }

        {
            let mut shared = self.shared.lock();
            let StreamShared { properties, pids } = &mut *shared;
            self.frontend.update(properties, pids)?;
        }

        if changed && self.producer.is_running() {
            let dvr = self.frontend.open_dvr()?;
            self.producer.restart_streaming(dvr)?;
        }

        let active = self.shared.lock().properties.is_stream_active();
        if !active {
            let dvr = self.frontend.open_dvr()?;
            if !self.producer.start_streaming(dvr) {
                return Err(StreamError::ThreadSpawn("rtp-producer"));
            }
            self.rtcp.start_streaming();
            self.shared.lock().properties.set_stream_active(true);
            tracing::info!(stream_id = self.stream_id, client_id, "stream active");
        }
        Ok(())
    }

    /// Close a client slot if its last request allowed it (TEARDOWN, or
    /// no Session header).
    pub fn close(&mut self, client_id: usize) {
        if self.clients.read()[client_id].can_close() {
            self.process_stop_stream(client_id, false);
        }
    }

    /// Tear down a client slot. Slot 0 cascades to every companion.
    pub fn teardown(&mut self, client_id: usize, graceful: bool) {
        tracing::info!(
            stream_id = self.stream_id,
            client_id,
            graceful,
            "teardown requested"
        );
        self.process_stop_stream(client_id, graceful);
    }

    /// Sweep all slots: reclaim those whose watchdog expired or that a
    /// transport failure marked for self-destruct.
    pub fn check_clients_with_timeout(&mut self) {
        let reclaim: Vec<usize> = self
            .clients
            .read()
            .iter()
            .filter(|c| !c.is_free() && (c.watchdog_expired() || c.self_destruct()))
            .map(|c| c.client_id())
            .collect();
        for client_id in reclaim {
            tracing::info!(
                stream_id = self.stream_id,
                client_id,
                "watchdog reclaiming client slot"
            );
            self.process_stop_stream(client_id, false);
        }
    }

    fn process_stop_stream(&mut self, client_id: usize, graceful: bool) {
        {
            let mut clients = self.clients.write();
            clients[client_id].teardown(graceful);
            if client_id == 0 {
                for companion in clients.iter_mut().skip(1) {
                    companion.teardown(false);
                }
            }
        }

        let any_attached = self.clients.read().iter().any(|c| !c.is_free());
        if !any_attached {
            self.producer.stop_streaming();
            self.rtcp.stop_streaming();
            {
                let mut shared = self.shared.lock();
                let StreamShared { properties, pids } = &mut *shared;
                if let Err(e) = self.frontend.teardown(properties, pids) {
                    tracing::warn!(stream_id = self.stream_id, error = %e, "frontend teardown failed");
                }
                properties.set_stream_active(false);
            }
            self.in_use = false;
            tracing::info!(stream_id = self.stream_id, "stream idle");
        }
    }
}
