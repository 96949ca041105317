//! Per-slice task context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::SchedulerConfig;
use super::scheduler::TaskWaker;
use super::TaskId;
use crate::executor::YieldCheckpoint;

/// Handed to a task for the duration of one slice
///
/// Acts as the yield checkpoint for the task's scan loop and gives the task
/// a waker for async calls it starts.
#[derive(Debug)]
pub struct TaskContext {
    task_id: TaskId,
    waker: TaskWaker,
    yield_interval_rows: u64,
    max_slice: Duration,
    yield_when_idle: bool,
    /// Another task was ready when this slice started
    others_ready: bool,
    slice_start: Instant,
    rows_in_slice: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        waker: TaskWaker,
        config: &SchedulerConfig,
        others_ready: bool,
    ) -> Self {
        Self {
            task_id,
            waker,
            yield_interval_rows: config.yield_interval_rows.max(1),
            max_slice: config.max_slice,
            yield_when_idle: config.yield_when_idle,
            others_ready,
            slice_start: Instant::now(),
            rows_in_slice: 0,
            cancel: None,
        }
    }

    /// Context for driving a task outside any scheduler; wakes are dropped
    pub fn detached(config: &SchedulerConfig) -> Self {
        Self::new(0, TaskWaker::detached(0), config, false)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Waker that puts this task back in the ready queue
    pub fn waker(&self) -> TaskWaker {
        self.waker.clone()
    }

    /// Observe `flag` at every checkpoint; once set, the scan fails as
    /// cancelled
    pub fn watch_cancel(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Checkpoints passed in this slice
    pub fn rows_in_slice(&self) -> u64 {
        self.rows_in_slice
    }

    /// Start a new slice on the same context
    pub fn reset_slice(&mut self, others_ready: bool) {
        self.others_ready = others_ready;
        self.slice_start = Instant::now();
        self.rows_in_slice = 0;
    }
}

impl YieldCheckpoint for TaskContext {
    fn yield_if_needed(&mut self, _row: i64) -> bool {
        self.rows_in_slice += 1;
        if !self.others_ready && !self.yield_when_idle {
            return false;
        }
        self.rows_in_slice >= self.yield_interval_rows
            || self.slice_start.elapsed() >= self.max_slice
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}
