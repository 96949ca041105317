//! Resumable command task
//!
//! Wraps one execution of a statement so the scheduler can drive it a slice
//! at a time. The task itself only moves `Pending -> Running -> Completed`
//! (or `Failed`); suspension at yield checkpoints, lock waits and parked
//! storage calls all happen inside the `Running` state.

use std::sync::Arc;

use crate::executor::{ExecutorError, ExecutorResult, QueryResult};
use crate::router::{Execution, Progress, QueryOptions, Router};
use crate::scheduler::{Slice, TaskContext, Yieldable};
use crate::storage::PartitionKey;

use super::future::{CommandFuture, ResultSlot};
use super::session::{Session, SessionStatus};
use super::statement::Statement;

/// Execution status of a command task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// How a statement is dispatched
#[derive(Debug, Clone)]
pub enum CommandRequest {
    Query(QueryOptions),
    Update { partitions: Option<Vec<PartitionKey>> },
}

/// Result types a command task can produce
pub trait CommandOutcome: Send + Sized + 'static {
    /// Ask the router for an execution of `statement`
    fn dispatch(
        router: &dyn Router,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        request: &CommandRequest,
    ) -> ExecutorResult<Box<dyn Execution<Self>>>;

    /// Rows returned or affected
    fn row_count(&self) -> u64;
}

impl CommandOutcome for QueryResult {
    fn dispatch(
        router: &dyn Router,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        request: &CommandRequest,
    ) -> ExecutorResult<Box<dyn Execution<Self>>> {
        match request {
            CommandRequest::Query(options) => router.dispatch_query(statement, session, options),
            CommandRequest::Update { .. } => Err(ExecutorError::InvalidStatement(
                "query task given an update request".to_string(),
            )),
        }
    }

    fn row_count(&self) -> u64 {
        self.row_count as u64
    }
}

impl CommandOutcome for u64 {
    fn dispatch(
        router: &dyn Router,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        request: &CommandRequest,
    ) -> ExecutorResult<Box<dyn Execution<Self>>> {
        match request {
            CommandRequest::Update { partitions } => {
                router.dispatch_update(statement, session, partitions.as_deref())
            }
            CommandRequest::Query(_) => Err(ExecutorError::InvalidStatement(
                "update task given a query request".to_string(),
            )),
        }
    }

    fn row_count(&self) -> u64 {
        *self
    }
}

/// Sets the terminal state when dropped, so completion sticks on every path
struct Finish<'a> {
    state: &'a mut TaskState,
    terminal: TaskState,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        *self.state = self.terminal;
    }
}

/// One execution of a statement, driven by the scheduler
pub struct CommandTask<T: CommandOutcome> {
    statement: Arc<Statement>,
    session: Arc<Session>,
    router: Arc<dyn Router>,
    request: CommandRequest,
    state: TaskState,
    execution: Option<Box<dyn Execution<T>>>,
    slot: ResultSlot<T>,
}

impl<T: CommandOutcome> CommandTask<T> {
    pub fn new(
        statement: Arc<Statement>,
        session: Arc<Session>,
        router: Arc<dyn Router>,
        request: CommandRequest,
    ) -> (Self, CommandFuture<T>) {
        let (slot, future) = ResultSlot::new();
        let task = Self {
            statement,
            session,
            router,
            request,
            state: TaskState::Pending,
            execution: None,
            slot,
        };
        (task, future)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Start the execution; a no-op unless the task is still pending
    pub fn execute(&mut self) {
        if self.state != TaskState::Pending {
            return;
        }
        self.state = TaskState::Running;
        self.session.reset_cancel();
        self.session.set_status(SessionStatus::StatementRunning);
        match T::dispatch(
            self.router.as_ref(),
            &self.statement,
            &self.session,
            &self.request,
        ) {
            Ok(execution) => self.execution = Some(execution),
            Err(e) => self.handle_result(Err(e)),
        }
    }

    /// Run one slice; a no-op once the task is terminal
    pub fn execute_internal(&mut self, cx: &mut TaskContext) -> Slice {
        self.execute();
        if self.state.is_terminal() {
            return Slice::Done;
        }

        cx.watch_cancel(self.session.cancel_flag());
        let progress = match self.execution.as_mut() {
            Some(execution) => execution.step(cx),
            None => Err(ExecutorError::Internal("task has no execution".to_string())),
        };
        match progress {
            Ok(Progress::Yielded) => Slice::Yielded,
            Ok(Progress::Blocked) => Slice::Blocked,
            Ok(Progress::Parked) => Slice::Parked,
            Ok(Progress::Ready(outcome)) => {
                self.handle_result(Ok(outcome));
                Slice::Done
            }
            Err(e) => {
                self.handle_result(Err(e));
                Slice::Done
            }
        }
    }

    /// Deliver the result and mark the task terminal
    fn handle_result(&mut self, result: ExecutorResult<T>) {
        if self.state.is_terminal() {
            return;
        }
        let _finish = Finish {
            state: &mut self.state,
            terminal: if result.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            },
        };
        self.execution = None;

        match result {
            Ok(outcome) => {
                let row_count = outcome.row_count();
                self.session.set_status(SessionStatus::StatementCompleted);
                tracing::debug!(session = self.session.id(), row_count, "Statement completed");
                self.slot.complete(Ok(outcome));
            }
            Err(e) => {
                tracing::debug!(session = self.session.id(), error = %e, "Statement failed");
                self.session.set_pending_exception(e.clone());
                self.slot.complete(Err(e));
            }
        }
    }
}

impl<T: CommandOutcome> Yieldable for CommandTask<T> {
    fn run_slice(&mut self, cx: &mut TaskContext) -> Slice {
        self.execute_internal(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Select, Update};
    use crate::scheduler::SchedulerConfig;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of steps
    struct Script(VecDeque<ExecutorResult<Progress<u64>>>);

    impl Execution<u64> for Script {
        fn step(&mut self, _cx: &mut TaskContext) -> ExecutorResult<Progress<u64>> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(ExecutorError::Internal("script exhausted".to_string())))
        }
    }

    struct ScriptRouter(parking_lot::Mutex<Option<Script>>);

    impl Router for ScriptRouter {
        fn dispatch_query(
            &self,
            _statement: &Arc<Statement>,
            _session: &Arc<Session>,
            _options: &QueryOptions,
        ) -> ExecutorResult<Box<dyn Execution<QueryResult>>> {
            Err(ExecutorError::InvalidStatement("no queries".to_string()))
        }

        fn dispatch_update(
            &self,
            _statement: &Arc<Statement>,
            _session: &Arc<Session>,
            _partitions: Option<&[PartitionKey]>,
        ) -> ExecutorResult<Box<dyn Execution<u64>>> {
            let script = self.0.lock().take().expect("dispatched once");
            Ok(Box::new(script))
        }
    }

    fn update_task(
        steps: Vec<ExecutorResult<Progress<u64>>>,
    ) -> (CommandTask<u64>, CommandFuture<u64>, Arc<Session>) {
        let session = Arc::new(Session::new(1));
        let router = Arc::new(ScriptRouter(parking_lot::Mutex::new(Some(Script(
            steps.into(),
        )))));
        let (task, future) = CommandTask::new(
            Arc::new(Statement::update(Update::new("t"))),
            session.clone(),
            router,
            CommandRequest::Update { partitions: None },
        );
        (task, future, session)
    }

    #[tokio::test]
    async fn test_success_spans_slices() {
        let (mut task, future, session) = update_task(vec![
            Ok(Progress::Yielded),
            Ok(Progress::Blocked),
            Ok(Progress::Ready(3)),
        ]);
        let mut cx = TaskContext::detached(&SchedulerConfig::default());
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.execute_internal(&mut cx), Slice::Yielded);
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(session.status(), SessionStatus::StatementRunning);
        assert_eq!(task.execute_internal(&mut cx), Slice::Blocked);
        assert_eq!(task.execute_internal(&mut cx), Slice::Done);
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(session.status(), SessionStatus::StatementCompleted);

        // Terminal: further slices do nothing
        assert_eq!(task.execute_internal(&mut cx), Slice::Done);
        assert_eq!(future.await, Ok(3));
    }

    #[tokio::test]
    async fn test_failure_sets_pending_exception() {
        let (mut task, future, session) =
            update_task(vec![Ok(Progress::Parked), Err(ExecutorError::Cancelled)]);
        let mut cx = TaskContext::detached(&SchedulerConfig::default());
        assert_eq!(task.execute_internal(&mut cx), Slice::Parked);
        assert_eq!(task.execute_internal(&mut cx), Slice::Done);
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(session.pending_exception(), Some(ExecutorError::Cancelled));
        assert_eq!(session.status(), SessionStatus::StatementRunning);
        assert_eq!(future.await, Err(ExecutorError::Cancelled));
    }

    #[tokio::test]
    async fn test_dispatch_failure_completes_task() {
        let session = Arc::new(Session::new(2));
        let router = Arc::new(ScriptRouter(parking_lot::Mutex::new(None)));
        let (mut task, future) = CommandTask::<QueryResult>::new(
            Arc::new(Statement::query(Select::new("t"))),
            session.clone(),
            router,
            CommandRequest::Query(QueryOptions::default()),
        );
        task.execute();
        assert_eq!(task.state(), TaskState::Failed);
        let mut cx = TaskContext::detached(&SchedulerConfig::default());
        assert_eq!(task.execute_internal(&mut cx), Slice::Done);
        assert!(matches!(
            future.await,
            Err(ExecutorError::InvalidStatement(_))
        ));
        assert!(session.pending_exception().is_some());
    }
}
