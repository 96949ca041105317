//! Cooperative statement scheduler
//!
//! One run loop per worker thread drives many in-flight statements. Each
//! turn pops the next ready task and runs one slice of it; the slice ends
//! when the task finishes, offers to yield at a row checkpoint, waits on a
//! lock, or starts an async storage call.
//!
//! ```text
//!              submit
//!                │
//!                ▼
//!   ┌──────► ready queue ──► run_slice ──► Done
//!   │            ▲               │
//!   │ Yielded /  │               │ Parked
//!   │ Blocked ───┘               ▼
//!   │                        parked set
//!   └──── TaskWaker::wake ◄──────┘
//! ```
//!
//! Yielded and blocked tasks go to the back of the queue, so no task runs
//! twice in a row while another is ready. Parked tasks re-enter the queue
//! when the future they wait on completes.

mod config;
mod context;
pub mod metrics;
mod pending;
#[allow(clippy::module_inception)]
mod scheduler;

pub use config::SchedulerConfig;
pub use context::TaskContext;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use pending::Pending;
pub use scheduler::{Scheduler, SchedulerHandle, TaskSpawner, TaskWaker};

/// Scheduler-assigned task identifier
pub type TaskId = u64;

/// How a slice ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    /// Suspended at a yield checkpoint; runnable again right away
    Yielded,
    /// Waiting for a lock; retried after the other ready tasks
    Blocked,
    /// Waiting for an async call; runnable again once its waker fires
    Parked,
    /// Terminal; the task is dropped
    Done,
}

/// A unit of work the scheduler can drive incrementally
pub trait Yieldable: Send {
    /// Run until the task finishes or has to give up the worker
    fn run_slice(&mut self, cx: &mut TaskContext) -> Slice;
}
