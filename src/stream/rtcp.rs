//! RTCP sender-report sidecar.
//!
//! One thread per stream, independent of the RTP producer. Every period
//! (200 ms × the stream's signal update frequency) it snapshots the
//! stream's statistics under the stream mutex, assembles one compound
//! packet and sends it to every attached client's RTCP port:
//!
//! ```text
//! +----------------+----------------+------------------------+
//! |   SR (28 B)    |  SDES (20 B)   |  APP (16 B + describe) |
//! |   PT = 200     |  PT = 202      |  PT = 204, name "SES1" |
//! +----------------+----------------+------------------------+
//! ```
//!
//! The APP payload is the SAT>IP describe string — that is how SAT>IP
//! clients read tuner lock/level/quality without a second protocol.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use super::{SharedClients, StreamShared};

/// Base tick of the sidecar; the configured update frequency multiplies it.
const RTCP_TICK: Duration = Duration::from_millis(200);

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// CNAME carried in the SDES chunk. Fixed six bytes, NUL-padded.
const SDES_CNAME: &[u8; 6] = b"SatPI\0";

/// Four-character name of the SAT>IP APP packet.
const APP_NAME: &[u8; 4] = b"SES1";

/// Periodic RTCP compound-packet sender for one stream.
pub struct RtcpSidecar {
    stream_id: usize,
    shared: Arc<Mutex<StreamShared>>,
    clients: SharedClients,
    cancel: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl RtcpSidecar {
    pub fn new(stream_id: usize, shared: Arc<Mutex<StreamShared>>, clients: SharedClients) -> Self {
        Self {
            stream_id,
            shared,
            clients,
            cancel: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the sidecar thread. Returns `false` when the socket or the
    /// thread could not be created; the stream stays up without RTCP.
    pub fn start_streaming(&mut self) -> bool {
        if self.is_running() {
            return true;
        }

        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(stream_id = self.stream_id, error = %e, "RTCP socket bind failed");
                return false;
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let stream_id = self.stream_id;
        let shared = self.shared.clone();
        let clients = self.clients.clone();
        let thread_cancel = cancel.clone();

        let spawned = thread::Builder::new()
            .name(format!("rtcp-stream-{stream_id}"))
            .spawn(move || {
                run(stream_id, socket, shared, clients, thread_cancel);
            });

        match spawned {
            Ok(handle) => {
                self.cancel = Some(cancel);
                self.handle = Some(handle);
                tracing::debug!(stream_id, "RTCP sidecar started");
                true
            }
            Err(e) => {
                tracing::error!(stream_id, error = %e, "RTCP thread spawn failed");
                false
            }
        }
    }

    /// Signal the thread to exit and wait for it. The thread observes
    /// the flag at every tick boundary.
    pub fn stop_streaming(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::debug!(stream_id = self.stream_id, "RTCP sidecar stopped");
        }
    }
}

impl Drop for RtcpSidecar {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

fn run(
    stream_id: usize,
    socket: UdpSocket,
    shared: Arc<Mutex<StreamShared>>,
    clients: SharedClients,
    cancel: Arc<AtomicBool>,
) {
    while !cancel.load(Ordering::SeqCst) {
        let (compound, period) = {
            let shared = shared.lock();
            let describe = shared.describe();
            let props = &shared.properties;
            (
                build_compound(
                    props.ssrc(),
                    ntp_seconds_now(),
                    props.timestamp() as u32,
                    props.spc(),
                    props.soc(),
                    &describe,
                ),
                RTCP_TICK * props.rtcp_signal_update_frequency(),
            )
        };

        match compound {
            Some(packet) => {
                let targets: Vec<_> = clients
                    .read()
                    .iter()
                    .filter(|c| !c.is_free())
                    .filter_map(|c| c.rtcp_addr())
                    .collect();
                for addr in targets {
                    if let Err(e) = socket.send_to(&packet, addr) {
                        tracing::warn!(stream_id, %addr, error = %e, "RTCP send failed");
                    }
                }
                sleep_cancellable(period, &cancel);
            }
            None => {
                tracing::warn!(stream_id, "RTCP compound assembly failed, retrying");
                sleep_cancellable(RTCP_TICK, &cancel);
            }
        }
    }
    tracing::debug!(stream_id, "RTCP sidecar exited");
}

/// Sleep up to `period`, waking early when the cancel flag is raised.
fn sleep_cancellable(period: Duration, cancel: &AtomicBool) {
    let mut remaining = period;
    while !remaining.is_zero() && !cancel.load(Ordering::SeqCst) {
        let step = remaining.min(RTCP_TICK);
        thread::sleep(step);
        remaining -= step;
    }
}

fn ntp_seconds_now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    (unix + NTP_UNIX_OFFSET) as u32
}

/// Assemble the full SR || SDES || APP compound packet.
///
/// Returns `None` when the describe string cannot be represented (longer
/// than the APP packet's 16-bit length field) — the sidecar loop treats
/// that as a transient resource failure.
pub fn build_compound(
    ssrc: u32,
    ntp_seconds: u32,
    rtp_timestamp: u32,
    spc: u32,
    soc: u32,
    describe: &str,
) -> Option<Vec<u8>> {
    let app = build_app(ssrc, describe)?;
    let mut packet = Vec::with_capacity(28 + 20 + app.len());
    packet.extend_from_slice(&build_sender_report(
        ssrc,
        ntp_seconds,
        rtp_timestamp,
        spc,
        soc,
    ));
    packet.extend_from_slice(&build_sdes(ssrc));
    packet.extend_from_slice(&app);
    Some(packet)
}

/// RTCP sender report (RFC 3550 §6.4.1), no report blocks.
///
/// The NTP fractional part is left zero — whole-second resolution is
/// enough for a tuner signal monitor.
fn build_sender_report(
    ssrc: u32,
    ntp_seconds: u32,
    rtp_timestamp: u32,
    spc: u32,
    soc: u32,
) -> [u8; 28] {
    let mut sr = [0u8; 28];
    sr[0] = 0x80; // V=2, P=0, RC=0
    sr[1] = 200;
    sr[2..4].copy_from_slice(&6u16.to_be_bytes()); // (28 / 4) - 1
    sr[4..8].copy_from_slice(&ssrc.to_be_bytes());
    sr[8..12].copy_from_slice(&ntp_seconds.to_be_bytes());
    // sr[12..16]: NTP fraction, zero
    sr[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    sr[20..24].copy_from_slice(&spc.to_be_bytes());
    sr[24..28].copy_from_slice(&soc.to_be_bytes());
    sr
}

/// RTCP source description (RFC 3550 §6.5): one chunk, one CNAME item,
/// NUL terminator, padded to a 32-bit boundary.
fn build_sdes(ssrc: u32) -> [u8; 20] {
    let mut sdes = [0u8; 20];
    sdes[0] = 0x81; // V=2, P=0, SC=1
    sdes[1] = 202;
    sdes[2..4].copy_from_slice(&4u16.to_be_bytes()); // (20 / 4) - 1
    sdes[4..8].copy_from_slice(&ssrc.to_be_bytes());
    sdes[8] = 1; // CNAME
    sdes[9] = SDES_CNAME.len() as u8;
    sdes[10..16].copy_from_slice(SDES_CNAME);
    // sdes[16..20]: END item + chunk padding, zero
    sdes
}

/// RTCP application-defined packet (RFC 3550 §6.7) in SAT>IP layout:
/// name `SES1`, a zero identifier, the 16-bit describe length, then the
/// describe string padded to a 32-bit boundary.
fn build_app(ssrc: u32, describe: &str) -> Option<Vec<u8>> {
    let desc = describe.as_bytes();
    if desc.len() > u16::MAX as usize {
        return None;
    }
    let unpadded = 16 + desc.len();
    let total = unpadded.next_multiple_of(4);

    let mut app = vec![0u8; total];
    app[0] = 0x80; // V=2, P=0, subtype=0
    app[1] = 204;
    app[2..4].copy_from_slice(&((total / 4 - 1) as u16).to_be_bytes());
    app[4..8].copy_from_slice(&ssrc.to_be_bytes());
    app[8..12].copy_from_slice(APP_NAME);
    // app[12..14]: identifier, zero
    app[14..16].copy_from_slice(&(desc.len() as u16).to_be_bytes());
    app[16..unpadded].copy_from_slice(desc);
    Some(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_report_layout() {
        let sr = build_sender_report(0xAABBCCDD, 3_900_000_000, 0x01020304, 42, 55_272);
        assert_eq!(sr.len(), 28);
        assert_eq!(sr[0], 0x80);
        assert_eq!(sr[1], 200);
        assert_eq!(u16::from_be_bytes([sr[2], sr[3]]), 6);
        assert_eq!(&sr[4..8], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(u32::from_be_bytes(sr[8..12].try_into().unwrap()), 3_900_000_000);
        assert_eq!(&sr[12..16], &[0, 0, 0, 0]);
        assert_eq!(&sr[16..20], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(u32::from_be_bytes(sr[20..24].try_into().unwrap()), 42);
        assert_eq!(u32::from_be_bytes(sr[24..28].try_into().unwrap()), 55_272);
    }

    #[test]
    fn sdes_layout() {
        let sdes = build_sdes(0x11223344);
        assert_eq!(sdes.len(), 20);
        assert_eq!(sdes[0], 0x81);
        assert_eq!(sdes[1], 202);
        assert_eq!(u16::from_be_bytes([sdes[2], sdes[3]]), 4);
        assert_eq!(&sdes[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(sdes[8], 1);
        assert_eq!(sdes[9], 6);
        assert_eq!(&sdes[10..16], b"SatPI\0");
        assert_eq!(&sdes[16..20], &[0, 0, 0, 0]);
    }

    #[test]
    fn app_layout() {
        let desc = "ver=1.0;tuner=1,0,0,0";
        let app = build_app(0x55667788, desc).unwrap();
        assert_eq!(app[1], 204);
        assert_eq!(&app[8..12], b"SES1");
        assert_eq!(&app[12..14], &[0, 0]);
        assert_eq!(
            u16::from_be_bytes([app[14], app[15]]) as usize,
            desc.len()
        );
        assert_eq!(&app[16..16 + desc.len()], desc.as_bytes());
        assert_eq!(app.len() % 4, 0);
        assert_eq!(
            u16::from_be_bytes([app[2], app[3]]) as usize,
            app.len() / 4 - 1
        );
    }

    #[test]
    fn app_pads_to_word_boundary() {
        // 16 + 1 = 17 bytes unpadded, padded to 20
        let app = build_app(1, "x").unwrap();
        assert_eq!(app.len(), 20);
        assert_eq!(&app[17..20], &[0, 0, 0]);
    }

    #[test]
    fn compound_is_sr_sdes_app() {
        let desc = "ver=1.0;tuner=1,0,0,0";
        let packet = build_compound(7, 100, 200, 3, 4, desc).unwrap();
        assert_eq!(packet[1], 200);
        assert_eq!(packet[28 + 1], 202);
        assert_eq!(packet[48 + 1], 204);
        assert_eq!(packet.len() % 4, 0);
    }

    #[test]
    fn oversized_describe_fails_assembly() {
        let desc = "x".repeat(u16::MAX as usize + 1);
        assert!(build_app(1, &desc).is_none());
        assert!(build_compound(1, 0, 0, 0, 0, &desc).is_none());
    }
}
