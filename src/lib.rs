//! # satip — SAT>IP streaming engine
//!
//! The core of a SAT>IP server: RTSP control sessions tune a DVB
//! frontend, the captured MPEG transport stream is multiplexed back to
//! each client as RTP/UDP, with RTCP sender reports on the side and an
//! optional hook for a cooperating descrambler daemon.
//!
//! ## Protocol references
//!
//! | RFC / spec | Topic | How this crate uses it |
//! |------------|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Session IDs, CSeq, Transport header, watchdog timeout |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | RTP header, SSRC, SR/SDES/APP compound packets |
//! | [RFC 3551](https://tools.ietf.org/html/rfc3551) | RTP profile | Payload type 33 (MP2T), 90 kHz clock |
//! | SAT>IP 1.2.2 | IP satellite TV | Transport parameter grammar, describe string, APP `SES1` |
//! | ISO 13818-1 | MPEG-TS | 188-byte packets, PID/CC fields, sync byte |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  RTSP dispatcher (external collaborator)     │
//! ├─────────────────────────────────────────────┤
//! │  Stream        — admission, tuning, teardown│
//! │  StreamClient  — per-session slots (max 8)  │
//! ├─────────────────────────────────────────────┤
//! │  RtpProducer   — DVR → ring → RTP/UDP       │
//! │  RtcpSidecar   — SR ‖ SDES ‖ APP per period │
//! ├─────────────────────────────────────────────┤
//! │  PacketBuffer  — datagram framing, resync   │
//! │  PidTable      — PID states, CC accounting  │
//! ├─────────────────────────────────────────────┤
//! │  Frontend / DvrSource / Descrambler traits   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use satip::{RtspRequest, Stream};
//!
//! # fn open_frontend() -> Box<dyn satip::dvb::Frontend> { unimplemented!() }
//! let mut stream = Stream::new(0, open_frontend());
//!
//! let setup = RtspRequest::parse(
//!     "SETUP rtsp://10.0.0.1/?freq=11836&pol=v&sr=27500&msys=dvbs2&pids=0,17,100 RTSP/1.0\r\n\
//!      CSeq: 1\r\n\
//!      Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
//! )?;
//! let client_id = stream.find_client_id_for(&setup, "10.0.0.2".parse().unwrap(), true, "A1B2C3D4")?;
//! stream.process_request(&setup, client_id)?;
//! stream.update(client_id)?; // tunes and starts RTP + RTCP delivery
//! # Ok::<(), satip::StreamError>(())
//! ```
//!
//! ## Crate layout
//!
//! - [`stream`] — [`Stream`] controller, client slots, producer and
//!   RTCP threads, tuning properties.
//! - [`mpegts`] — [`PacketBuffer`] and [`PidTable`], the hot-path
//!   structures.
//! - [`dvb`] — delivery-system types and the [`Frontend`](dvb::Frontend)
//!   / [`DvrSource`](dvb::DvrSource) collaborator traits.
//! - [`protocol`] — [`RtspRequest`] surface and the SAT>IP transport
//!   parameter grammar.
//! - [`descramble`] — hook for an external control-word daemon.
//! - [`clock`] — injected monotonic tick source for RTP timing.
//! - [`error`] — [`StreamError`] enum and [`Result`] alias.

pub mod clock;
pub mod descramble;
pub mod dvb;
pub mod error;
pub mod mpegts;
pub mod protocol;
pub mod stream;

pub use error::{Result, StreamError};
pub use mpegts::{PacketBuffer, PidTable};
pub use protocol::RtspRequest;
pub use stream::{MAX_CLIENTS, Stream, StreamClient, StreamProperties};
