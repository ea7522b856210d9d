//! RTP producer: DVR capture, packetization, and the send loop.
//!
//! One dedicated thread per active stream. Each pass of the loop polls
//! the DVR device, fills the current [`PacketBuffer`] of a fixed ring,
//! re-synchronizes the payload, marks and purges packets private to the
//! descrambler, then hands the finished datagram to every attached
//! client over a non-blocking UDP socket.
//!
//! ```text
//!           poll(100 ms)      full?   synced?          per client
//! DVR ──read──▶ ring[w % 100] ──▶ resync ──▶ purge ──▶ tag ──▶ sendto
//! ```
//!
//! The thread runs a three-state machine — `Running`, `Pause`, `Paused`
//! — guarded by a short critical section. Pausing drains the ring, so a
//! retune never replays pre-retune bytes. The controller restarts the
//! thread by handing it a fresh DVR handle.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::TickSource;
use crate::descramble::Descrambler;
use crate::dvb::frontend::DvrSource;
use crate::error::{Result, StreamError};
use crate::mpegts::{self, PacketBuffer, RTP_HEADER_LEN};

use super::sink::TsFileSink;
use super::{SharedClients, StreamShared};

/// Depth of the packet-buffer ring.
pub const MAX_BUF: usize = 100;

/// DVR poll interval; also bounds how fast the thread observes
/// cancellation and state changes.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// Pause requested; the thread drains the ring and parks.
    Pause,
    Paused,
}

/// Shared control block between the controller and the worker thread.
struct Control {
    state: Mutex<State>,
    signal: Condvar,
    cancel: AtomicBool,
    /// Fresh DVR handle for the next restart.
    dvr_handoff: Mutex<Option<Box<dyn DvrSource>>>,
}

/// Controller-side handle to the producer thread.
pub struct RtpProducer {
    stream_id: usize,
    shared: Arc<Mutex<StreamShared>>,
    clients: SharedClients,
    descrambler: Arc<dyn Descrambler>,
    clock: Arc<dyn TickSource>,
    sink: Arc<Mutex<Option<TsFileSink>>>,
    control: Option<Arc<Control>>,
    handle: Option<JoinHandle<()>>,
}

impl RtpProducer {
    pub fn new(
        stream_id: usize,
        shared: Arc<Mutex<StreamShared>>,
        clients: SharedClients,
        descrambler: Arc<dyn Descrambler>,
        clock: Arc<dyn TickSource>,
    ) -> Self {
        Self {
            stream_id,
            shared,
            clients,
            descrambler,
            clock,
            sink: Arc::new(Mutex::new(None)),
            control: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Install or remove the raw TS file sink.
    pub fn set_file_sink(&self, sink: Option<TsFileSink>) {
        *self.sink.lock() = sink;
    }

    /// Spawn the producer thread reading from `dvr`.
    ///
    /// Returns `false` when the socket or thread could not be created,
    /// or when a previous thread died and could not be replaced.
    pub fn start_streaming(&mut self, dvr: Box<dyn DvrSource>) -> bool {
        if self.is_running() {
            return self.restart_streaming(dvr).is_ok();
        }
        // reap a dead thread before respawning
        self.stop_streaming();

        let socket = match UdpSocket::bind("0.0.0.0:0").and_then(|s| {
            s.set_nonblocking(true)?;
            Ok(s)
        }) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(stream_id = self.stream_id, error = %e, "RTP socket bind failed");
                return false;
            }
        };

        let control = Arc::new(Control {
            state: Mutex::new(State::Running),
            signal: Condvar::new(),
            cancel: AtomicBool::new(false),
            dvr_handoff: Mutex::new(None),
        });

        let worker = Worker {
            stream_id: self.stream_id,
            dvr,
            socket,
            ring: (0..MAX_BUF).map(|_| PacketBuffer::new()).collect(),
            write_index: 0,
            read_index: 0,
            cseq: 0,
            shared: self.shared.clone(),
            clients: self.clients.clone(),
            descrambler: self.descrambler.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
            control: control.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("rtp-stream-{}", self.stream_id))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.control = Some(control);
                self.handle = Some(handle);
                tracing::debug!(stream_id = self.stream_id, "RTP producer started");
                true
            }
            Err(e) => {
                tracing::error!(stream_id = self.stream_id, error = %e, "RTP thread spawn failed");
                false
            }
        }
    }

    /// Ask the thread to pause and wait until it has drained the ring.
    pub fn pause_streaming(&self) -> Result<()> {
        let control = self.control.as_ref().ok_or(StreamError::ProducerNotRunning)?;

        let mut state = control.state.lock();
        *state = State::Pause;
        control.signal.notify_all();
        while *state != State::Paused {
            if !self.is_running() {
                return Err(StreamError::ProducerNotRunning);
            }
            control.signal.wait_for(&mut state, POLL_TIMEOUT);
        }
        tracing::debug!(stream_id = self.stream_id, "RTP producer paused");
        Ok(())
    }

    /// Hand the thread a fresh DVR handle and resume.
    pub fn restart_streaming(&self, dvr: Box<dyn DvrSource>) -> Result<()> {
        let control = self.control.as_ref().ok_or(StreamError::ProducerNotRunning)?;
        if !self.is_running() {
            return Err(StreamError::ProducerNotRunning);
        }
        *control.dvr_handoff.lock() = Some(dvr);
        *control.state.lock() = State::Running;
        control.signal.notify_all();
        tracing::debug!(stream_id = self.stream_id, "RTP producer restarted");
        Ok(())
    }

    /// Stop the thread; returns once it has exited.
    pub fn stop_streaming(&mut self) {
        if let Some(control) = self.control.take() {
            control.cancel.store(true, Ordering::SeqCst);
            control.signal.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::debug!(stream_id = self.stream_id, "RTP producer stopped");
        }
    }
}

impl Drop for RtpProducer {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

enum Fill {
    Full,
    /// Read would block before the buffer filled; poll again.
    Partial,
    /// EOF or read error; back off one poll period.
    Stalled,
}

struct Worker {
    stream_id: usize,
    dvr: Box<dyn DvrSource>,
    socket: UdpSocket,
    ring: Vec<PacketBuffer>,
    write_index: usize,
    read_index: usize,
    /// RTP sequence number, per stream.
    cseq: u16,
    shared: Arc<Mutex<StreamShared>>,
    clients: SharedClients,
    descrambler: Arc<dyn Descrambler>,
    clock: Arc<dyn TickSource>,
    sink: Arc<Mutex<Option<TsFileSink>>>,
    control: Arc<Control>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(stream_id = self.stream_id, "producer thread up");
        while !self.control.cancel.load(Ordering::SeqCst) {
            let state = *self.control.state.lock();
            match state {
                State::Running => {
                    if !self.produce_once() {
                        break;
                    }
                }
                State::Pause => self.drain_and_park(),
                State::Paused => self.wait_for_restart(),
            }
        }
        tracing::debug!(stream_id = self.stream_id, "producer thread exited");
    }

    /// Drop every in-flight buffer, then park. Nothing captured before a
    /// pause may be transmitted after the restart.
    fn drain_and_park(&mut self) {
        for buffer in &mut self.ring {
            buffer.reset();
        }
        self.read_index = self.write_index;

        let mut state = self.control.state.lock();
        if *state == State::Pause {
            *state = State::Paused;
        }
        self.control.signal.notify_all();
    }

    fn wait_for_restart(&mut self) {
        {
            let mut state = self.control.state.lock();
            while *state == State::Paused && !self.control.cancel.load(Ordering::SeqCst) {
                self.control.signal.wait_for(&mut state, POLL_TIMEOUT);
            }
        }
        if let Some(dvr) = self.control.dvr_handoff.lock().take() {
            self.dvr = dvr;
            tracing::debug!(stream_id = self.stream_id, "switched to new DVR handle");
        }
    }

    /// One pass of the capture loop. Returns `false` on a fatal error.
    fn produce_once(&mut self) -> bool {
        if self.write_index - self.read_index == MAX_BUF {
            tracing::warn!(
                stream_id = self.stream_id,
                "packet ring full, dropping oldest buffer"
            );
            self.ring[self.read_index % MAX_BUF].reset();
            self.read_index += 1;
        }

        match self.dvr.wait_readable(POLL_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => return true,
            Err(e) => {
                tracing::error!(stream_id = self.stream_id, error = %e, "DVR poll failed, producer stopping");
                return false;
            }
        }

        let slot = self.write_index % MAX_BUF;
        if !self.ring[slot].is_initialized() {
            let ssrc = self.shared.lock().properties.ssrc();
            self.ring[slot].initialize(ssrc, self.clock.now_ms() * 90);
        }

        match self.fill_buffer(slot) {
            Fill::Full => {}
            Fill::Partial => return true,
            Fill::Stalled => {
                thread::sleep(POLL_TIMEOUT);
                return true;
            }
        }

        if !self.ring[slot].try_syncing() {
            return true;
        }
        if !self.ring[slot].is_full() {
            // resync shifted the payload down; top up on the next pass
            return true;
        }

        self.account_and_mark(slot);
        self.ring[slot].purge();
        self.write_index += 1;

        while self.read_index < self.write_index {
            let send_slot = self.read_index % MAX_BUF;
            self.send_buffer(send_slot);
            self.ring[send_slot].reset();
            self.read_index += 1;
        }
        true
    }

    fn fill_buffer(&mut self, slot: usize) -> Fill {
        loop {
            if self.ring[slot].is_full() {
                return Fill::Full;
            }
            match self.dvr.read(self.ring[slot].write_slot()) {
                Ok(0) => {
                    tracing::debug!(stream_id = self.stream_id, "DVR returned EOF");
                    return Fill::Stalled;
                }
                Ok(n) => self.ring[slot].advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Fill::Partial,
                Err(e) => {
                    tracing::warn!(stream_id = self.stream_id, error = %e, "DVR read error");
                    return Fill::Stalled;
                }
            }
        }
    }

    /// Per-packet accounting and descrambler marks for a synced buffer.
    fn account_and_mark(&mut self, slot: usize) {
        let count = self.ring[slot].ts_packet_count();
        let mut private = Vec::new();
        {
            let mut shared = self.shared.lock();
            for n in 0..count {
                let packet = self.ring[slot].ts_packet(n);
                let pid = mpegts::ts_pid(packet);
                shared.pids.add_pid_data(pid, mpegts::ts_cc(packet));
                if self.descrambler.is_private_pid(self.stream_id, pid) {
                    private.push(n);
                }
            }
        }
        self.descrambler.process(self.stream_id, &mut self.ring[slot]);
        for n in private {
            self.ring[slot].mark_ts_for_purging(n);
        }
        let seen = RTP_HEADER_LEN + count * mpegts::TS_PACKET_SIZE;
        self.ring[slot].set_processed_index(seen);
    }

    /// Tag and dispatch one finished buffer to every attached client.
    fn send_buffer(&mut self, slot: usize) {
        if self.ring[slot].ts_packet_count() == 0 {
            return;
        }

        let timestamp = self.clock.now_ms() * 90;
        self.cseq = self.cseq.wrapping_add(1);
        self.ring[slot].tag_rtp_header(self.cseq, timestamp);

        let targets: Vec<(usize, SocketAddr)> = self
            .clients
            .read()
            .iter()
            .filter(|c| !c.is_free() && !c.self_destruct())
            .filter_map(|c| c.rtp_addr().map(|addr| (c.client_id(), addr)))
            .collect();

        let datagram = self.ring[slot].as_rtp_datagram();
        let mut failed = Vec::new();
        for (client_id, addr) in targets {
            match self.socket.send_to(datagram, addr) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::trace!(
                        stream_id = self.stream_id,
                        client_id,
                        "socket backpressure, datagram dropped"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        stream_id = self.stream_id,
                        client_id,
                        %addr,
                        error = %e,
                        "RTP send failed, scheduling client teardown"
                    );
                    failed.push(client_id);
                }
            }
        }
        let payload_octets = (datagram.len() - RTP_HEADER_LEN) as u32;

        if !failed.is_empty() {
            let mut clients = self.clients.write();
            for client_id in failed {
                clients[client_id].mark_self_destruct();
            }
        }

        self.shared
            .lock()
            .properties
            .add_rtp_data(payload_octets, timestamp);

        if let Some(sink) = self.sink.lock().as_mut() {
            sink.write(&self.ring[slot].as_rtp_datagram()[RTP_HEADER_LEN..]);
        }
    }
}
