//! Scheduler counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the run loop
///
/// Shared through `Arc` so a handle can read them while the loop runs on
/// its own thread.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Tasks accepted
    pub submitted: AtomicU64,
    /// Slices run
    pub turns: AtomicU64,
    /// Slices that ended at a yield checkpoint
    pub yields: AtomicU64,
    /// Slices that ended waiting on a lock
    pub blocked: AtomicU64,
    /// Slices that ended waiting on an async call
    pub parks: AtomicU64,
    /// Tasks that reached a terminal state
    pub completed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            turns: self.turns.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub turns: u64,
    pub yields: u64,
    pub blocked: u64,
    pub parks: u64,
    pub completed: u64,
}

impl MetricsSnapshot {
    /// Tasks submitted but not yet finished
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}
