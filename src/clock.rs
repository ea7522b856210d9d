//! Monotonic tick service.
//!
//! RTP timestamps for an MP2T stream run on a 90 kHz clock (RFC 3551 §4).
//! The producer derives them as `ticks_ms × 90` from a single injected
//! tick source, so tests can substitute a deterministic clock and no
//! component reads the wall clock for media timing.

use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic millisecond ticks.
///
/// Injected into the stream at construction; the RTP producer is the only
/// hot-path consumer. Implementations must be cheap — the producer calls
/// [`now_ms`](Self::now_ms) once per dispatched datagram.
pub trait TickSource: Send + Sync {
    /// Milliseconds elapsed from an arbitrary fixed origin.
    fn now_ms(&self) -> i64;
}

/// Tick source backed by [`Instant`], anchored at construction time.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl TickSource for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ticks_are_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        thread::sleep(Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
