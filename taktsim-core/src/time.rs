//! Virtual run clock.
//!
//! A deterministic clock owned by the coordinator. Time is an integer
//! microsecond counter, monotonic non-decreasing within a run, and entirely
//! decoupled from wall-clock time: it only moves when the coordinator commits
//! a quantum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The single virtual clock of a simulation run.
///
/// Cloning is cheap and shares the underlying counter, so other components
/// (telemetry, diagnostics) can observe the clock without being able to own
/// time progression — only the coordinator calls [`RunClock::advance_to`].
#[derive(Clone)]
pub struct RunClock {
    offset: Arc<AtomicU64>, // Microseconds
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RunClock {
    /// Creates a clock starting at the given virtual time.
    pub fn new(start_us: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(start_us)),
        }
    }

    /// Current virtual time in microseconds.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Commits the clock to `target_us`. A target behind the current time is
    /// ignored, which keeps the counter monotonic even under misuse.
    #[inline]
    pub fn advance_to(&self, target_us: u64) {
        self.offset.fetch_max(target_us, Ordering::AcqRel);
    }
}
