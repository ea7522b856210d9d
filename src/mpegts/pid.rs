//! PID capture table and continuity-counter accounting.

/// Number of table slots: 8192 real PIDs plus the all-PIDs sentinel.
pub const MAX_PIDS: usize = 8193;

/// Sentinel slot meaning "capture the full transport stream".
pub const ALL_PIDS: u16 = 8192;

/// Capture state of one PID.
///
/// Requested transitions come from the RTSP side via
/// [`PidTable::set_pid`]; `Opened`/`Closed` are acknowledgments from the
/// frontend reconciler. Between two reconciliation passes at most one of
/// the `Should*` states is live for a given PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PidState {
    /// Requested but the kernel demux filter is not open yet.
    ShouldOpen,
    /// The demux filter is open; packets are flowing.
    Opened,
    /// Release requested; the filter is still open.
    ShouldClose,
    /// Re-requested while open with a pending change: close, then open
    /// again with fresh filter parameters.
    ShouldCloseReopen,
    /// Not captured.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct PidData {
    state: PidState,
    /// Last observed continuity counter (0..15).
    cc: u8,
    cc_error: u32,
    /// Number of packets observed on this PID.
    count: u32,
}

impl Default for PidData {
    fn default() -> Self {
        Self {
            state: PidState::Closed,
            cc: 0,
            cc_error: 0,
            count: 0,
        }
    }
}

/// Which PIDs are captured from the frontend, and in what state.
///
/// The table is written by the stream controller (RTSP parameter changes)
/// and by the producer (per-packet accounting); the frontend reconciler
/// consumes the `Should*` deltas and acknowledges them via
/// [`set_pid_opened`](Self::set_pid_opened) /
/// [`set_pid_closed`](Self::set_pid_closed). Any state transition raises
/// the `changed` flag, cleared only by
/// [`reset_pid_table_changed`](Self::reset_pid_table_changed).
pub struct PidTable {
    data: Box<[PidData]>,
    total_cc_errors: u32,
    /// Snapshot taken at the last reset; session-relative error counts
    /// are reported against it.
    total_cc_errors_begin: u32,
    changed: bool,
}

impl PidTable {
    pub fn new() -> Self {
        Self {
            data: vec![PidData::default(); MAX_PIDS].into_boxed_slice(),
            total_cc_errors: 0,
            total_cc_errors_begin: 0,
            changed: false,
        }
    }

    /// Drop all PID state and counters, e.g. when a new frequency is
    /// requested and the old channel's PID set is meaningless.
    pub fn clear(&mut self) {
        for entry in self.data.iter_mut() {
            *entry = PidData::default();
        }
        self.total_cc_errors = 0;
        self.total_cc_errors_begin = 0;
        self.changed = true;
    }

    /// Request a PID to be captured (`use_pid`) or released.
    pub fn set_pid(&mut self, pid: u16, use_pid: bool) {
        let entry = &mut self.data[pid as usize];
        let next = if use_pid {
            match entry.state {
                PidState::Closed | PidState::ShouldClose => Some(PidState::ShouldOpen),
                PidState::Opened => Some(PidState::ShouldCloseReopen),
                PidState::ShouldOpen | PidState::ShouldCloseReopen => None,
            }
        } else {
            match entry.state {
                PidState::Opened | PidState::ShouldCloseReopen => Some(PidState::ShouldClose),
                PidState::ShouldOpen => Some(PidState::Closed),
                PidState::Closed | PidState::ShouldClose => None,
            }
        };
        if let Some(state) = next {
            tracing::trace!(pid, ?state, "PID transition");
            entry.state = state;
            self.changed = true;
        }
    }

    /// Toggle the all-PIDs sentinel. Individual PID entries are not
    /// touched; full-TS capture is a distinct mode.
    pub fn set_all_pid(&mut self, use_pid: bool) {
        self.set_pid(ALL_PIDS, use_pid);
    }

    pub fn is_all_pid(&self) -> bool {
        self.data[ALL_PIDS as usize].state == PidState::Opened
    }

    pub fn is_pid_opened(&self, pid: u16) -> bool {
        self.data[pid as usize].state == PidState::Opened
    }

    pub fn should_pid_open(&self, pid: u16) -> bool {
        self.data[pid as usize].state == PidState::ShouldOpen
    }

    pub fn should_pid_close(&self, pid: u16) -> bool {
        matches!(
            self.data[pid as usize].state,
            PidState::ShouldClose | PidState::ShouldCloseReopen
        )
    }

    /// Acknowledge that the demux filter for `pid` is open. Per-PID
    /// counters restart from zero.
    pub fn set_pid_opened(&mut self, pid: u16) {
        let entry = &mut self.data[pid as usize];
        entry.state = PidState::Opened;
        entry.cc = 0;
        entry.cc_error = 0;
        entry.count = 0;
    }

    /// Acknowledge that the demux filter for `pid` is closed. A PID in
    /// `ShouldCloseReopen` goes straight back to `ShouldOpen` so the next
    /// reconciliation pass reopens it.
    pub fn set_pid_closed(&mut self, pid: u16) {
        let entry = &mut self.data[pid as usize];
        entry.state = if entry.state == PidState::ShouldCloseReopen {
            PidState::ShouldOpen
        } else {
            PidState::Closed
        };
    }

    /// Account one observed TS packet: bump the packet counter and check
    /// the continuity counter against the previous packet. The first
    /// packet after a filter open never counts as a discontinuity.
    pub fn add_pid_data(&mut self, pid: u16, cc: u8) {
        let entry = &mut self.data[pid as usize];
        entry.count = entry.count.wrapping_add(1);
        if entry.count > 1 && (entry.cc + 1) & 0x0f != cc {
            entry.cc_error += 1;
            self.total_cc_errors += 1;
        }
        entry.cc = cc;
    }

    pub fn get_packet_counter(&self, pid: u16) -> u32 {
        self.data[pid as usize].count
    }

    pub fn get_cc_errors(&self, pid: u16) -> u32 {
        self.data[pid as usize].cc_error
    }

    /// Continuity errors accumulated since the last
    /// [`reset_pid_table_changed`](Self::reset_pid_table_changed).
    pub fn get_total_cc_errors(&self) -> u32 {
        self.total_cc_errors - self.total_cc_errors_begin
    }

    pub fn has_pid_table_changed(&self) -> bool {
        self.changed
    }

    /// Clear the changed flag and snapshot the CC error baseline.
    /// Called by the reconciler once the deltas have been applied.
    pub fn reset_pid_table_changed(&mut self) {
        self.changed = false;
        self.total_cc_errors_begin = self.total_cc_errors;
    }

    /// Comma-separated ascending list of the currently opened PIDs, or
    /// `"all"` when the full-TS sentinel is on.
    pub fn get_pid_csv(&self) -> String {
        if self.is_all_pid() {
            return "all".to_string();
        }
        let mut csv = String::new();
        for pid in 0..ALL_PIDS {
            if self.is_pid_opened(pid) {
                if !csv.is_empty() {
                    csv.push(',');
                }
                csv.push_str(&pid.to_string());
            }
        }
        csv
    }
}

impl Default for PidTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_pid_opens_via_should_open() {
        let mut table = PidTable::new();
        table.set_pid(100, true);
        assert!(table.should_pid_open(100));
        assert!(table.has_pid_table_changed());

        table.set_pid_opened(100);
        assert!(table.is_pid_opened(100));
        assert!(!table.should_pid_open(100));
    }

    #[test]
    fn opened_pid_closes_via_should_close() {
        let mut table = PidTable::new();
        table.set_pid(17, true);
        table.set_pid_opened(17);
        table.reset_pid_table_changed();

        table.set_pid(17, false);
        assert!(table.should_pid_close(17));
        assert!(table.has_pid_table_changed());

        table.set_pid_closed(17);
        assert!(!table.is_pid_opened(17));
        assert!(!table.should_pid_close(17));
    }

    #[test]
    fn reopen_while_opened_closes_then_reopens() {
        let mut table = PidTable::new();
        table.set_pid(200, true);
        table.set_pid_opened(200);

        table.set_pid(200, true);
        assert!(table.should_pid_close(200));

        table.set_pid_closed(200);
        assert!(table.should_pid_open(200));
    }

    #[test]
    fn request_then_release_returns_to_closed() {
        let mut table = PidTable::new();
        table.set_pid(5, true);
        table.set_pid(5, false);
        assert!(!table.should_pid_open(5));
        assert!(!table.should_pid_close(5));
        assert!(!table.is_pid_opened(5));
        assert!(table.has_pid_table_changed());
    }

    #[test]
    fn changed_cleared_only_by_reset() {
        let mut table = PidTable::new();
        table.set_pid(1, true);
        table.set_pid_opened(1);
        assert!(table.has_pid_table_changed());
        table.reset_pid_table_changed();
        assert!(!table.has_pid_table_changed());
    }

    #[test]
    fn cc_accounting_flags_discontinuity() {
        let mut table = PidTable::new();
        table.add_pid_data(100, 3); // first packet, no error possible
        table.add_pid_data(100, 4);
        table.add_pid_data(100, 5);
        assert_eq!(table.get_cc_errors(100), 0);

        table.add_pid_data(100, 9); // jump
        assert_eq!(table.get_cc_errors(100), 1);
        assert_eq!(table.get_total_cc_errors(), 1);
        assert_eq!(table.get_packet_counter(100), 4);
    }

    #[test]
    fn cc_wraps_at_sixteen() {
        let mut table = PidTable::new();
        table.add_pid_data(7, 15);
        table.add_pid_data(7, 0);
        assert_eq!(table.get_cc_errors(7), 0);
    }

    #[test]
    fn total_cc_errors_are_session_relative() {
        let mut table = PidTable::new();
        table.add_pid_data(1, 0);
        table.add_pid_data(1, 5);
        assert_eq!(table.get_total_cc_errors(), 1);

        table.reset_pid_table_changed();
        assert_eq!(table.get_total_cc_errors(), 0);

        table.add_pid_data(1, 9);
        assert_eq!(table.get_total_cc_errors(), 1);
    }

    #[test]
    fn all_pids_sentinel_is_separate() {
        let mut table = PidTable::new();
        table.set_pid(0, true);
        table.set_pid_opened(0);
        table.set_all_pid(true);
        assert!(!table.is_all_pid()); // not acknowledged yet
        table.set_pid_opened(ALL_PIDS);
        assert!(table.is_all_pid());
        // individual entries untouched by the sentinel
        assert!(table.is_pid_opened(0));
    }

    #[test]
    fn pid_csv_lists_opened_ascending() {
        let mut table = PidTable::new();
        for pid in [17u16, 0, 100] {
            table.set_pid(pid, true);
            table.set_pid_opened(pid);
        }
        assert_eq!(table.get_pid_csv(), "0,17,100");
    }

    #[test]
    fn pid_csv_reports_all_mode() {
        let mut table = PidTable::new();
        table.set_all_pid(true);
        table.set_pid_opened(ALL_PIDS);
        assert_eq!(table.get_pid_csv(), "all");
    }

    #[test]
    fn clear_drops_state_and_counters() {
        let mut table = PidTable::new();
        table.set_pid(100, true);
        table.set_pid_opened(100);
        table.add_pid_data(100, 0);
        table.add_pid_data(100, 7);

        table.clear();
        assert!(!table.is_pid_opened(100));
        assert_eq!(table.get_packet_counter(100), 0);
        assert_eq!(table.get_total_cc_errors(), 0);
        assert!(table.has_pid_table_changed());
    }
}
