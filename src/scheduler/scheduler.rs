//! Run loop, task submission and wakeups

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::config::SchedulerConfig;
use super::context::TaskContext;
use super::metrics::{MetricsSnapshot, SchedulerMetrics};
use super::{Slice, TaskId, Yieldable};

// ============================================================================
// Inbox - cross-thread entry point into a run loop
// ============================================================================

#[derive(Default)]
struct InboxState {
    submitted: Vec<(TaskId, Box<dyn Yieldable>)>,
    woken: Vec<TaskId>,
    shutdown: bool,
}

/// Submissions and wakeups waiting for the run loop to pick them up
#[derive(Default)]
struct Inbox {
    state: Mutex<InboxState>,
    signal: Condvar,
    next_id: AtomicU64,
}

impl Inbox {
    fn submit(&self, task: Box<dyn Yieldable>) -> Option<TaskId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        state.submitted.push((id, task));
        drop(state);
        self.signal.notify_one();
        Some(id)
    }

    fn wake(&self, id: TaskId) {
        self.state.lock().woken.push(id);
        self.signal.notify_one();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.signal.notify_all();
    }

    fn drain(&self) -> (Vec<(TaskId, Box<dyn Yieldable>)>, Vec<TaskId>, bool) {
        let mut state = self.state.lock();
        (
            std::mem::take(&mut state.submitted),
            std::mem::take(&mut state.woken),
            state.shutdown,
        )
    }

    /// Block until something is submitted or woken, or `timeout` passes
    ///
    /// A shutdown request also ends the wait unless `ignore_shutdown` is set.
    fn wait(&self, timeout: Option<Duration>, ignore_shutdown: bool) {
        let mut state = self.state.lock();
        let idle = |s: &InboxState| {
            s.submitted.is_empty() && s.woken.is_empty() && (ignore_shutdown || !s.shutdown)
        };
        if !idle(&*state) {
            return;
        }
        match timeout {
            Some(timeout) => {
                self.signal.wait_for(&mut state, timeout);
            }
            None => {
                while idle(&*state) {
                    self.signal.wait(&mut state);
                }
            }
        }
    }
}

// ============================================================================
// Handles given out to tasks and submitters
// ============================================================================

/// Puts a parked task back in its scheduler's ready queue
#[derive(Clone)]
pub struct TaskWaker {
    id: TaskId,
    inbox: Weak<Inbox>,
}

impl TaskWaker {
    /// A waker attached to no scheduler
    pub(crate) fn detached(id: TaskId) -> Self {
        Self {
            id,
            inbox: Weak::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Wake the task; a no-op once the scheduler is gone
    pub fn wake(&self) {
        if let Some(inbox) = self.inbox.upgrade() {
            inbox.wake(self.id);
        }
    }
}

impl fmt::Debug for TaskWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWaker").field("id", &self.id).finish()
    }
}

/// Cloneable handle for submitting tasks to a scheduler
#[derive(Clone)]
pub struct TaskSpawner {
    inbox: Arc<Inbox>,
    metrics: Arc<SchedulerMetrics>,
}

impl TaskSpawner {
    /// Queue a task
    ///
    /// Returns `None`, dropping the task, once the scheduler has shut down.
    pub fn submit(&self, task: Box<dyn Yieldable>) -> Option<TaskId> {
        let id = self.inbox.submit(task);
        match id {
            Some(task_id) => {
                SchedulerMetrics::incr(&self.metrics.submitted);
                tracing::trace!(task_id, "Submitted task");
            }
            None => tracing::warn!("Task submitted after scheduler shutdown"),
        }
        id
    }
}

impl fmt::Debug for TaskSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpawner").finish_non_exhaustive()
    }
}

// ============================================================================
// Scheduler - the run loop
// ============================================================================

struct Entry {
    id: TaskId,
    task: Box<dyn Yieldable>,
}

/// Cooperative round-robin scheduler
///
/// Can be stepped on the current thread (`run_once`, `run_until_idle`) or
/// moved onto a dedicated thread with [`SchedulerHandle::spawn`].
pub struct Scheduler {
    config: SchedulerConfig,
    inbox: Arc<Inbox>,
    metrics: Arc<SchedulerMetrics>,
    ready: VecDeque<Entry>,
    parked: HashMap<TaskId, Box<dyn Yieldable>>,
    /// Consecutive slices that ended blocked
    stalled: usize,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            inbox: Arc::new(Inbox::default()),
            metrics: Arc::new(SchedulerMetrics::new()),
            ready: VecDeque::new(),
            parked: HashMap::new(),
            stalled: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn spawner(&self) -> TaskSpawner {
        TaskSpawner {
            inbox: self.inbox.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Queue a task; it becomes ready at the start of the next turn
    pub fn submit(&self, task: Box<dyn Yieldable>) -> Option<TaskId> {
        self.spawner().submit(task)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Move submissions and woken tasks into the ready queue
    ///
    /// Returns whether shutdown was requested.
    fn drain_inbox(&mut self) -> bool {
        let (submitted, woken, shutdown) = self.inbox.drain();
        for (id, task) in submitted {
            self.ready.push_back(Entry { id, task });
        }
        for id in woken {
            // Wakes for tasks that are not parked are stale
            if let Some(task) = self.parked.remove(&id) {
                tracing::trace!(task_id = id, "Unparked task");
                self.ready.push_back(Entry { id, task });
            }
        }
        shutdown
    }

    /// Run one slice of the next ready task
    ///
    /// Returns the task and how its slice ended, or `None` if nothing was
    /// ready.
    pub fn run_once(&mut self) -> Option<(TaskId, Slice)> {
        self.drain_inbox();
        let Entry { id, mut task } = self.ready.pop_front()?;

        let waker = TaskWaker {
            id,
            inbox: Arc::downgrade(&self.inbox),
        };
        let mut cx = TaskContext::new(id, waker, &self.config, !self.ready.is_empty());
        let slice = task.run_slice(&mut cx);
        SchedulerMetrics::incr(&self.metrics.turns);

        match slice {
            Slice::Yielded => {
                SchedulerMetrics::incr(&self.metrics.yields);
                self.ready.push_back(Entry { id, task });
            }
            Slice::Blocked => {
                SchedulerMetrics::incr(&self.metrics.blocked);
                self.ready.push_back(Entry { id, task });
            }
            Slice::Parked => {
                SchedulerMetrics::incr(&self.metrics.parks);
                self.parked.insert(id, task);
            }
            Slice::Done => {
                SchedulerMetrics::incr(&self.metrics.completed);
                tracing::trace!(task_id = id, "Task done");
            }
        }

        if slice == Slice::Blocked {
            self.stalled += 1;
        } else {
            self.stalled = 0;
        }
        Some((id, slice))
    }

    /// Whether every ready task blocked since the last slice with progress
    fn is_stalled(&self) -> bool {
        self.stalled > 0 && self.stalled >= self.ready.len()
    }

    /// Run until no task is ready or parked
    ///
    /// Parked tasks are waited for, so their async calls must be able to
    /// complete while this thread is busy here.
    pub fn run_until_idle(&mut self) {
        loop {
            self.drain_inbox();
            if self.ready.is_empty() {
                if self.parked.is_empty() {
                    return;
                }
                self.inbox.wait(Some(self.config.idle_wait), true);
                continue;
            }
            if self.is_stalled() {
                self.inbox.wait(Some(self.config.idle_wait), true);
                self.stalled = 0;
            }
            self.run_once();
        }
    }

    /// Loop body of a dedicated scheduler thread
    fn run_until_shutdown(mut self) {
        tracing::debug!("Scheduler loop started");
        loop {
            let shutdown = self.drain_inbox();
            if self.ready.is_empty() {
                if shutdown {
                    if self.parked.is_empty() {
                        break;
                    }
                    self.inbox.wait(Some(self.config.idle_wait), true);
                } else {
                    self.inbox.wait(None, false);
                }
                continue;
            }
            if self.is_stalled() {
                self.inbox.wait(Some(self.config.idle_wait), false);
                self.stalled = 0;
            }
            self.run_once();
        }
        let metrics = self.metrics.snapshot();
        tracing::debug!(
            turns = metrics.turns,
            completed = metrics.completed,
            "Scheduler loop stopped"
        );
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("ready", &self.ready.len())
            .field("parked", &self.parked.len())
            .finish()
    }
}

/// A scheduler running on its own thread
///
/// Dropping the handle shuts the loop down after every submitted task has
/// finished.
pub struct SchedulerHandle {
    spawner: TaskSpawner,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Start a scheduler thread
    pub fn spawn(config: SchedulerConfig) -> std::io::Result<Self> {
        let scheduler = Scheduler::new(config);
        let spawner = scheduler.spawner();
        let thread = thread::Builder::new()
            .name("yieldsql-scheduler".to_string())
            .spawn(move || scheduler.run_until_shutdown())?;
        Ok(Self {
            spawner,
            thread: Some(thread),
        })
    }

    pub fn spawner(&self) -> TaskSpawner {
        self.spawner.clone()
    }

    pub fn submit(&self, task: Box<dyn Yieldable>) -> Option<TaskId> {
        self.spawner.submit(task)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.spawner.metrics.snapshot()
    }

    /// Stop accepting tasks, finish the queued ones and join the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.spawner.inbox.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    /// Records its id into a shared trace for a fixed number of slices
    struct Counter {
        name: char,
        slices: usize,
        trace: Arc<PlMutex<Vec<char>>>,
    }

    impl Yieldable for Counter {
        fn run_slice(&mut self, _cx: &mut TaskContext) -> Slice {
            self.trace.lock().push(self.name);
            self.slices -= 1;
            if self.slices == 0 {
                Slice::Done
            } else {
                Slice::Yielded
            }
        }
    }

    #[test]
    fn test_round_robin() {
        let trace = Arc::new(PlMutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        for (name, slices) in [('a', 3), ('b', 1), ('c', 2)] {
            scheduler.submit(Box::new(Counter {
                name,
                slices,
                trace: trace.clone(),
            }));
        }
        scheduler.run_until_idle();

        assert_eq!(*trace.lock(), vec!['a', 'b', 'c', 'a', 'c', 'a']);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.turns, 6);
        assert_eq!(metrics.completed, 3);
        assert_eq!(metrics.yields, 3);
        assert_eq!(metrics.in_flight(), 0);
    }

    /// Parks once and expects to be woken by someone else
    struct Parker {
        parked: bool,
        waker: Arc<PlMutex<Option<TaskWaker>>>,
    }

    impl Yieldable for Parker {
        fn run_slice(&mut self, cx: &mut TaskContext) -> Slice {
            if self.parked {
                return Slice::Done;
            }
            self.parked = true;
            *self.waker.lock() = Some(cx.waker());
            Slice::Parked
        }
    }

    #[test]
    fn test_park_and_wake() {
        let slot = Arc::new(PlMutex::new(None));
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let id = scheduler
            .submit(Box::new(Parker {
                parked: false,
                waker: slot.clone(),
            }))
            .unwrap();

        assert_eq!(scheduler.run_once(), Some((id, Slice::Parked)));
        assert_eq!(scheduler.run_once(), None);
        assert_eq!(scheduler.parked_count(), 1);

        let waker = slot.lock().take().unwrap();
        assert_eq!(waker.task_id(), id);
        waker.wake();
        assert_eq!(scheduler.run_once(), Some((id, Slice::Done)));
        assert_eq!(scheduler.parked_count(), 0);
    }

    #[test]
    fn test_handle_runs_and_shuts_down() {
        let trace = Arc::new(PlMutex::new(Vec::new()));
        let handle = SchedulerHandle::spawn(SchedulerConfig::default()).unwrap();
        handle.submit(Box::new(Counter {
            name: 'x',
            slices: 4,
            trace: trace.clone(),
        }));
        let spawner = handle.spawner();
        handle.shutdown();

        assert_eq!(trace.lock().len(), 4);
        assert!(spawner
            .submit(Box::new(Counter {
                name: 'y',
                slices: 1,
                trace,
            }))
            .is_none());
    }
}
