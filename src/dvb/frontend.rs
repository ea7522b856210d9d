//! Frontend and DVR collaborator traits.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::mpegts::{MAX_PIDS, PidTable};
use crate::stream::properties::StreamProperties;

use super::tuning::DeliverySystem;

/// A tuner as seen by the stream controller.
///
/// Implementations wrap the platform's frontend/demux devices; this crate
/// only drives the lifecycle: check capability at admission, retune and
/// reconcile PID filters on every update, hand out a fresh DVR capture
/// handle, release everything on teardown.
pub trait Frontend: Send {
    /// Whether this tuner can handle the given delivery system.
    fn capable_of(&self, system: DeliverySystem) -> bool;

    /// Apply pending channel changes and PID filter deltas.
    ///
    /// Implementations retune when
    /// [`has_channel_data_changed`](StreamProperties::has_channel_data_changed)
    /// is set (clearing the flag on success) and then walk the PID table
    /// deltas, typically via [`reconcile_pids`]. A refused tune surfaces
    /// as [`StreamError::TuneFailed`](crate::StreamError::TuneFailed).
    fn update(&mut self, properties: &mut StreamProperties, pids: &mut PidTable) -> Result<()>;

    /// Release the tuner; close all demux filters.
    fn teardown(&mut self, properties: &mut StreamProperties, pids: &mut PidTable) -> Result<()>;

    /// Fresh handle to the DVR device carrying the captured TS.
    fn open_dvr(&mut self) -> Result<Box<dyn DvrSource>>;

    fn is_tuned(&self) -> bool;
}

/// Byte source for the captured transport stream.
///
/// The producer drives it with a poll-then-read loop; reads must never
/// block (return `WouldBlock` instead).
pub trait DvrSource: Send {
    /// Wait up to `timeout` for the device to become readable.
    /// `Ok(false)` means the timeout elapsed.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Non-blocking read into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// DVR character device (`/dev/dvb/adapterN/dvr0`), opened non-blocking
/// and polled with `poll(2)`.
pub struct DvrDevice {
    file: File,
}

impl DvrDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        tracing::debug!(path = %path.display(), fd = file.as_raw_fd(), "DVR device opened");
        Ok(Self { file })
    }
}

impl DvrSource for DvrDevice {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
        match rc {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(false),
            _ => Ok(pfd.revents & libc::POLLIN != 0),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Filter delta handed to the frontend by [`reconcile_pids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidDelta {
    Open,
    Close,
}

/// Walk the PID table deltas and acknowledge each applied one.
///
/// Close comes before open for the same PID so a close-and-reopen request
/// resolves within a single pass: the close acknowledgment moves the PID
/// to `ShouldOpen`, which the same iteration then opens. Clears the
/// table's changed flag once the walk completes.
pub fn reconcile_pids<F>(pids: &mut PidTable, mut apply: F) -> Result<()>
where
    F: FnMut(u16, PidDelta) -> Result<()>,
{
    for pid in 0..MAX_PIDS as u16 {
        if pids.should_pid_close(pid) {
            apply(pid, PidDelta::Close)?;
            pids.set_pid_closed(pid);
        }
        if pids.should_pid_open(pid) {
            apply(pid, PidDelta::Open)?;
            pids.set_pid_opened(pid);
        }
    }
    pids.reset_pid_table_changed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_opens_requested_pids() {
        let mut pids = PidTable::new();
        pids.set_pid(0, true);
        pids.set_pid(17, true);

        let mut opened = Vec::new();
        reconcile_pids(&mut pids, |pid, delta| {
            if delta == PidDelta::Open {
                opened.push(pid);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(opened, vec![0, 17]);
        assert!(pids.is_pid_opened(0));
        assert!(pids.is_pid_opened(17));
        assert!(!pids.has_pid_table_changed());
    }

    #[test]
    fn reconcile_resolves_reopen_in_one_pass() {
        let mut pids = PidTable::new();
        pids.set_pid(100, true);
        reconcile_pids(&mut pids, |_, _| Ok(())).unwrap();

        // re-request while opened: close then open again
        pids.set_pid(100, true);
        let mut deltas = Vec::new();
        reconcile_pids(&mut pids, |pid, delta| {
            deltas.push((pid, delta));
            Ok(())
        })
        .unwrap();

        assert_eq!(deltas, vec![(100, PidDelta::Close), (100, PidDelta::Open)]);
        assert!(pids.is_pid_opened(100));
    }

    #[test]
    fn reconcile_closes_released_pids() {
        let mut pids = PidTable::new();
        pids.set_pid(17, true);
        reconcile_pids(&mut pids, |_, _| Ok(())).unwrap();

        pids.set_pid(17, false);
        let mut closed = Vec::new();
        reconcile_pids(&mut pids, |pid, delta| {
            if delta == PidDelta::Close {
                closed.push(pid);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(closed, vec![17]);
        assert!(!pids.is_pid_opened(17));
    }
}
