//! RTP datagram assembly buffer for transport stream packets.

use super::{TS_PACKET_SIZE, TS_SYNC_BYTE};

/// Maximum size of one RTP/UDP datagram on the wire.
pub const MTU: usize = 1500;

/// Length of the RTP fixed header reserved at the head of the buffer
/// (RFC 3550 §5.1 — no CSRC list, no extension).
pub const RTP_HEADER_LEN: usize = 12;

/// Largest TS payload that fits in one datagram: an integral number of
/// 188-byte packets below the MTU, minus the RTP header.
pub const MTU_MAX_TS_PACKET_SIZE: usize =
    ((MTU - RTP_HEADER_LEN) / TS_PACKET_SIZE) * TS_PACKET_SIZE;

const BUFFER_LEN: usize = RTP_HEADER_LEN + MTU_MAX_TS_PACKET_SIZE;

/// RTP payload type for MPEG-2 transport stream (MP2T, RFC 3551 §6).
const PAYLOAD_TYPE_MP2T: u8 = 33;

/// Three packets in a row are required before the payload counts as
/// synchronized.
const SYNC_RUN: usize = 3;

/// One RTP datagram in the making.
///
/// ```text
/// 0          12                                            write_index
/// +----------+--------+--------+--------+-- ... --+--------+.........+
/// | RTP hdr  | TS pkt | TS pkt | TS pkt |         | TS pkt |  free   |
/// +----------+--------+--------+--------+-- ... --+--------+.........+
/// ```
///
/// The producer reads raw bytes from the DVR device into
/// [`write_slot`](Self::write_slot) and advances `write_index` by the
/// amount read. Once full, the buffer is re-synchronized in place
/// ([`try_syncing`](Self::try_syncing)), packets private to the
/// descrambler are marked ([`mark_ts_for_purging`](Self::mark_ts_for_purging))
/// and compacted away ([`purge`](Self::purge)), and the RTP header is
/// stamped ([`tag_rtp_header`](Self::tag_rtp_header)) just before the
/// datagram goes out.
pub struct PacketBuffer {
    data: [u8; BUFFER_LEN],
    write_index: usize,
    /// High-water mark of bytes already seen by the descrambler.
    processed_index: usize,
    initialized: bool,
    synced: bool,
    purge_pending: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            data: [0u8; BUFFER_LEN],
            write_index: RTP_HEADER_LEN,
            processed_index: RTP_HEADER_LEN,
            initialized: false,
            synced: false,
            purge_pending: 0,
        }
    }

    /// Write the 12-byte RTP header once: version 2, no padding, no
    /// extension, payload type 33 (MP2T). The sequence number stays zero
    /// until [`tag_rtp_header`](Self::tag_rtp_header).
    pub fn initialize(&mut self, ssrc: u32, timestamp: i64) {
        self.data[0] = 0x80;
        self.data[1] = PAYLOAD_TYPE_MP2T;
        self.data[2..4].copy_from_slice(&0u16.to_be_bytes());
        self.data[4..8].copy_from_slice(&(timestamp as u32).to_be_bytes());
        self.data[8..12].copy_from_slice(&ssrc.to_be_bytes());
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Discard all payload. The RTP header region is left as-is.
    pub fn reset(&mut self) {
        self.write_index = RTP_HEADER_LEN;
        self.processed_index = RTP_HEADER_LEN;
        self.synced = false;
        self.purge_pending = 0;
    }

    /// The region available for the next DVR read.
    pub fn write_slot(&mut self) -> &mut [u8] {
        &mut self.data[self.write_index..BUFFER_LEN]
    }

    /// Advance the write position by `n` bytes actually read into
    /// [`write_slot`](Self::write_slot).
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.write_index + n <= BUFFER_LEN);
        self.write_index += n;
    }

    pub fn is_full(&self) -> bool {
        self.write_index == BUFFER_LEN
    }

    /// Payload bytes accumulated so far.
    pub fn get_current_buffer_size(&self) -> usize {
        self.write_index - RTP_HEADER_LEN
    }

    /// Number of complete TS packets in the payload.
    pub fn ts_packet_count(&self) -> usize {
        self.get_current_buffer_size() / TS_PACKET_SIZE
    }

    /// Whether the payload starts on a verified TS packet boundary.
    pub fn is_synced(&self) -> bool {
        self.synced && self.data[RTP_HEADER_LEN] == TS_SYNC_BYTE
    }

    /// Bytes already handed to the descrambler.
    pub fn processed_index(&self) -> usize {
        self.processed_index
    }

    pub fn set_processed_index(&mut self, index: usize) {
        debug_assert!(index <= self.write_index);
        self.processed_index = index;
    }

    /// Re-synchronize the payload to a TS packet boundary in place.
    ///
    /// Requires at least three packets worth of payload; returns `false`
    /// without mutation when there is less. If the payload already starts
    /// with `0x47` and was synced before, this is a no-op returning `true`.
    /// Otherwise the payload is scanned for three `0x47` bytes spaced 188
    /// apart; on a hit everything from the match is moved to the start of
    /// the payload region and both indices drop by the skipped amount. No
    /// hit resets the buffer.
    pub fn try_syncing(&mut self) -> bool {
        if self.get_current_buffer_size() < SYNC_RUN * TS_PACKET_SIZE {
            return false;
        }
        if self.is_synced() {
            return true;
        }

        let scan_end = (BUFFER_LEN - (SYNC_RUN - 1) * TS_PACKET_SIZE)
            .min(self.write_index - (SYNC_RUN - 1) * TS_PACKET_SIZE);
        for i in RTP_HEADER_LEN..scan_end {
            if self.data[i] == TS_SYNC_BYTE
                && self.data[i + TS_PACKET_SIZE] == TS_SYNC_BYTE
                && self.data[i + 2 * TS_PACKET_SIZE] == TS_SYNC_BYTE
            {
                let skip = i - RTP_HEADER_LEN;
                if skip > 0 {
                    self.data.copy_within(i..self.write_index, RTP_HEADER_LEN);
                    self.write_index -= skip;
                    self.processed_index =
                        self.processed_index.saturating_sub(skip).max(RTP_HEADER_LEN);
                    tracing::debug!(skip, "TS stream re-synchronized");
                }
                self.synced = true;
                return true;
            }
        }

        tracing::warn!(
            payload = self.get_current_buffer_size(),
            "no TS sync pattern found, dropping buffer"
        );
        self.reset();
        false
    }

    /// Borrow the `n`-th TS packet of the payload.
    pub fn ts_packet(&self, n: usize) -> &[u8] {
        let start = RTP_HEADER_LEN + n * TS_PACKET_SIZE;
        &self.data[start..start + TS_PACKET_SIZE]
    }

    /// Mark the `n`-th TS packet for removal by [`purge`](Self::purge).
    ///
    /// The mark is an `0xFF` in the second header byte; the sync byte is
    /// untouched, so a marked packet still scans as aligned.
    pub fn mark_ts_for_purging(&mut self, n: usize) {
        debug_assert!(n < self.ts_packet_count());
        let mark = RTP_HEADER_LEN + n * TS_PACKET_SIZE + 1;
        if self.data[mark] != 0xff {
            self.data[mark] = 0xff;
            self.purge_pending += 1;
        }
    }

    /// Number of packets currently marked for purging.
    pub fn purge_pending(&self) -> usize {
        self.purge_pending
    }

    /// Remove all marked TS packets, compacting the payload.
    ///
    /// Sweeps back to front so each unmarked packet moves at most once;
    /// adjacent marked packets are coalesced into a single shift.
    pub fn purge(&mut self) {
        if self.purge_pending == 0 {
            return;
        }
        let marked = |data: &[u8; BUFFER_LEN], n: usize| {
            data[RTP_HEADER_LEN + n * TS_PACKET_SIZE + 1] == 0xff
        };

        let mut n = self.ts_packet_count();
        while n > 0 {
            n -= 1;
            if marked(&self.data, n) {
                let run_end = n + 1;
                let mut run_start = n;
                while run_start > 0 && marked(&self.data, run_start - 1) {
                    run_start -= 1;
                }
                let src = RTP_HEADER_LEN + run_end * TS_PACKET_SIZE;
                let dst = RTP_HEADER_LEN + run_start * TS_PACKET_SIZE;
                self.data.copy_within(src..self.write_index, dst);
                self.write_index -= (run_end - run_start) * TS_PACKET_SIZE;
                n = run_start;
            }
        }
        self.purge_pending = 0;
    }

    /// Rewrite the RTP sequence number and timestamp just before sending.
    /// Bytes `[0..2)` (version/flags/payload type) are never touched.
    pub fn tag_rtp_header(&mut self, sequence: u16, timestamp: i64) {
        self.data[2..4].copy_from_slice(&sequence.to_be_bytes());
        self.data[4..8].copy_from_slice(&(timestamp as u32).to_be_bytes());
    }

    /// The complete datagram: RTP header plus payload written so far.
    pub fn as_rtp_datagram(&self) -> &[u8] {
        &self.data[..self.write_index]
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fill the buffer with `count` well-formed TS packets; the payload
    /// byte at offset 4 of packet `k` is `k`, so order survives purging.
    fn fill_packets(buf: &mut PacketBuffer, count: usize) {
        for k in 0..count {
            let slot = buf.write_slot();
            slot[0] = TS_SYNC_BYTE;
            slot[1] = 0x00;
            slot[2] = 0x64;
            slot[3] = (k & 0x0f) as u8;
            slot[4] = k as u8;
            for b in &mut slot[5..TS_PACKET_SIZE] {
                *b = 0xaa;
            }
            buf.advance(TS_PACKET_SIZE);
        }
    }

    #[test]
    fn max_ts_payload_is_seven_packets() {
        assert_eq!(MTU_MAX_TS_PACKET_SIZE, 7 * TS_PACKET_SIZE);
    }

    #[test]
    fn initialize_writes_rtp_header() {
        let mut buf = PacketBuffer::new();
        buf.initialize(0xAABBCCDD, 0x11223344);
        let d = buf.as_rtp_datagram();
        assert_eq!(d[0], 0x80);
        assert_eq!(d[1], 33);
        assert_eq!(&d[2..4], &[0, 0]);
        assert_eq!(&d[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&d[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(buf.is_initialized());
    }

    #[test]
    fn tag_rewrites_sequence_and_timestamp_only() {
        let mut buf = PacketBuffer::new();
        buf.initialize(0xAABBCCDD, 0);
        buf.tag_rtp_header(0x0102, 0x55667788);
        let d = buf.as_rtp_datagram();
        assert_eq!(&d[0..2], &[0x80, 33]);
        assert_eq!(&d[2..4], &[0x01, 0x02]);
        assert_eq!(&d[4..8], &[0x55, 0x66, 0x77, 0x88]);
        assert_eq!(&d[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn timestamp_truncates_to_lower_32_bits() {
        let mut buf = PacketBuffer::new();
        buf.initialize(1, 0);
        buf.tag_rtp_header(1, 0x1_0000_0001);
        assert_eq!(&buf.as_rtp_datagram()[4..8], &[0, 0, 0, 1]);
    }

    #[test]
    fn write_slot_accounting() {
        let mut buf = PacketBuffer::new();
        assert_eq!(buf.write_slot().len(), MTU_MAX_TS_PACKET_SIZE);
        buf.advance(100);
        assert_eq!(buf.write_slot().len(), MTU_MAX_TS_PACKET_SIZE - 100);
        assert_eq!(buf.get_current_buffer_size(), 100);
    }

    #[test]
    fn syncing_requires_three_packets() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 2);
        assert!(!buf.try_syncing());
        // insufficient data must not mutate
        assert_eq!(buf.get_current_buffer_size(), 2 * TS_PACKET_SIZE);
    }

    #[test]
    fn syncing_on_aligned_payload() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 7);
        assert!(buf.try_syncing());
        assert!(buf.is_synced());
        assert_eq!(buf.get_current_buffer_size(), 7 * TS_PACKET_SIZE);
    }

    #[test]
    fn syncing_skips_garbage_prefix() {
        let mut buf = PacketBuffer::new();
        {
            let slot = buf.write_slot();
            for b in &mut slot[..47] {
                *b = 0x00;
            }
        }
        buf.advance(47);
        fill_packets(&mut buf, 6);

        assert!(buf.try_syncing());
        assert_eq!(buf.get_current_buffer_size(), 6 * TS_PACKET_SIZE);
        let d = buf.as_rtp_datagram();
        assert_eq!(d[RTP_HEADER_LEN], TS_SYNC_BYTE);
        assert_eq!(d[RTP_HEADER_LEN + TS_PACKET_SIZE], TS_SYNC_BYTE);
    }

    #[test]
    fn syncing_failure_resets_buffer() {
        let mut buf = PacketBuffer::new();
        {
            let slot = buf.write_slot();
            for b in slot.iter_mut().take(4 * TS_PACKET_SIZE) {
                *b = 0x00;
            }
        }
        buf.advance(4 * TS_PACKET_SIZE);
        assert!(!buf.try_syncing());
        assert_eq!(buf.get_current_buffer_size(), 0);
        assert!(!buf.is_synced());
    }

    #[test]
    fn every_packet_starts_with_sync_byte_after_resync() {
        let mut buf = PacketBuffer::new();
        {
            let slot = buf.write_slot();
            for b in &mut slot[..100] {
                *b = 0x13;
            }
        }
        buf.advance(100);
        fill_packets(&mut buf, 5);
        assert!(buf.try_syncing());
        for k in 0..buf.ts_packet_count() {
            assert_eq!(buf.ts_packet(k)[0], TS_SYNC_BYTE);
        }
    }

    #[test]
    fn purge_removes_marked_packets_in_order() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 7);
        buf.mark_ts_for_purging(2);
        buf.mark_ts_for_purging(3);
        assert_eq!(buf.purge_pending(), 2);

        buf.purge();

        assert_eq!(buf.get_current_buffer_size(), 5 * TS_PACKET_SIZE);
        assert_eq!(buf.purge_pending(), 0);
        let survivors: Vec<u8> = (0..5).map(|n| buf.ts_packet(n)[4]).collect();
        assert_eq!(survivors, vec![0, 1, 4, 5, 6]);
    }

    #[test]
    fn purge_coalesces_separate_runs() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 7);
        buf.mark_ts_for_purging(0);
        buf.mark_ts_for_purging(3);
        buf.mark_ts_for_purging(4);
        buf.mark_ts_for_purging(6);

        buf.purge();

        assert_eq!(buf.ts_packet_count(), 3);
        let survivors: Vec<u8> = (0..3).map(|n| buf.ts_packet(n)[4]).collect();
        assert_eq!(survivors, vec![1, 2, 5]);
    }

    #[test]
    fn no_purge_marks_survive_purge() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 7);
        buf.mark_ts_for_purging(1);
        buf.mark_ts_for_purging(5);
        buf.purge();
        for n in 0..buf.ts_packet_count() {
            assert_ne!(buf.ts_packet(n)[1], 0xff);
        }
    }

    #[test]
    fn purge_without_marks_is_noop() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 4);
        buf.purge();
        assert_eq!(buf.ts_packet_count(), 4);
    }

    #[test]
    fn mark_is_idempotent() {
        let mut buf = PacketBuffer::new();
        fill_packets(&mut buf, 4);
        buf.mark_ts_for_purging(2);
        buf.mark_ts_for_purging(2);
        assert_eq!(buf.purge_pending(), 1);
        buf.purge();
        assert_eq!(buf.ts_packet_count(), 3);
    }
}
