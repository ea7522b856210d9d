//! Descrambler side channel.
//!
//! A stream may cooperate with an external control-word daemon (OSCam)
//! that descrambles the transport stream in place. The daemon needs to see
//! certain table PIDs (ECM/EMM, its own filter data) that must never be
//! forwarded to RTP clients. The producer asks this trait, per TS packet,
//! whether the packet belongs to the daemon; if so the packet is marked
//! and removed by [`PacketBuffer::purge`](crate::mpegts::PacketBuffer::purge)
//! before the datagram is sent.
//!
//! The cryptography and the daemon protocol live outside this crate; the
//! trait is the seam.

use crate::mpegts::PacketBuffer;

/// Cooperating descrambler for one stream.
pub trait Descrambler: Send + Sync {
    /// Whether `pid` is private to the descrambler and must be purged
    /// from outgoing datagrams.
    fn is_private_pid(&self, stream_id: usize, pid: u16) -> bool;

    /// Hand a full, synced buffer to the descrambler before it is sent.
    ///
    /// The default implementation does nothing. Real implementations
    /// descramble payloads in place and feed table sections to the daemon.
    fn process(&self, stream_id: usize, buffer: &mut PacketBuffer) {
        let _ = (stream_id, buffer);
    }
}

/// No-op descrambler for free-to-air streams.
pub struct NullDescrambler;

impl Descrambler for NullDescrambler {
    fn is_private_pid(&self, _stream_id: usize, _pid: u16) -> bool {
        false
    }
}
