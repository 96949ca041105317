//! Statement dispatch
//!
//! A router turns a bound statement into an [`Execution`]: a state machine
//! the command task steps once per scheduler slice. [`LocalRouter`] runs
//! statements against the storage engine of this node; a distributed router
//! would fan them out to partition owners behind the same trait.

mod query;
mod update;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::command::{Session, Statement, StatementKind};
use crate::executor::{ExecutorError, ExecutorResult, QueryResult};
use crate::scheduler::TaskContext;
use crate::storage::{PartitionKey, StorageEngine};
use crate::txn::TransactionManager;

pub use query::QueryExecution;
pub use update::UpdateExecution;

/// What one step of an execution achieved
#[derive(Debug, Clone, PartialEq)]
pub enum Progress<T> {
    /// Suspended at a yield checkpoint
    Yielded,
    /// Waiting for a lock held by another transaction
    Blocked,
    /// Waiting for an async call; the task's waker fires when it completes
    Parked,
    /// Finished with a result
    Ready(T),
}

/// A statement execution driven by scheduler slices
pub trait Execution<T>: Send {
    /// Advance as far as possible without blocking the worker
    fn step(&mut self, cx: &mut TaskContext) -> ExecutorResult<Progress<T>>;
}

/// Query options given at execution time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Row cap; `<= 0` returns every row
    pub max_rows: i32,
    /// The caller may move backwards through the result
    pub scrollable: bool,
    /// Overrides the statement's own partition targets
    pub partitions: Option<Vec<PartitionKey>>,
}

/// Dispatches statements to executions
pub trait Router: Send + Sync {
    fn dispatch_query(
        &self,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        options: &QueryOptions,
    ) -> ExecutorResult<Box<dyn Execution<QueryResult>>>;

    fn dispatch_update(
        &self,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        partitions: Option<&[PartitionKey]>,
    ) -> ExecutorResult<Box<dyn Execution<u64>>>;
}

/// Router for statements against the local storage engine
///
/// Storage calls are spawned on `runtime` and re-enter the scheduler through
/// the task waker.
pub struct LocalRouter {
    txn_manager: Arc<TransactionManager>,
    runtime: Handle,
}

impl LocalRouter {
    pub fn new(txn_manager: Arc<TransactionManager>, runtime: Handle) -> Self {
        Self {
            txn_manager,
            runtime,
        }
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        self.txn_manager.storage()
    }

    /// Commit the session's open transaction, if any
    pub fn commit(&self, session: &Session) -> ExecutorResult<()> {
        if let Some(txn_id) = session.end_transaction() {
            self.txn_manager.commit(txn_id)?;
        }
        Ok(())
    }

    /// Roll back the session's open transaction, if any
    pub async fn rollback(&self, session: &Session) -> ExecutorResult<()> {
        if let Some(txn_id) = session.end_transaction() {
            self.txn_manager.rollback(txn_id).await?;
        }
        Ok(())
    }
}

/// Partition targets for one execution: explicit ones win
fn targets(
    explicit: Option<&[PartitionKey]>,
    statement: &Statement,
) -> Option<Vec<PartitionKey>> {
    explicit
        .or_else(|| statement.partitions())
        .map(<[PartitionKey]>::to_vec)
}

impl Router for LocalRouter {
    fn dispatch_query(
        &self,
        statement: &Arc<Statement>,
        _session: &Arc<Session>,
        options: &QueryOptions,
    ) -> ExecutorResult<Box<dyn Execution<QueryResult>>> {
        let StatementKind::Query(select) = statement.kind() else {
            return Err(ExecutorError::InvalidStatement(
                "executeQuery on an update".to_string(),
            ));
        };
        let partitions = targets(options.partitions.as_deref(), statement);
        tracing::debug!(
            table = %select.table,
            max_rows = options.max_rows,
            scrollable = options.scrollable,
            partitions = ?partitions,
            "Dispatching query"
        );
        Ok(Box::new(QueryExecution::new(
            select.clone(),
            statement.parameters().to_vec(),
            options.max_rows,
            partitions,
            self.storage().clone(),
            self.runtime.clone(),
        )))
    }

    fn dispatch_update(
        &self,
        statement: &Arc<Statement>,
        session: &Arc<Session>,
        partitions: Option<&[PartitionKey]>,
    ) -> ExecutorResult<Box<dyn Execution<u64>>> {
        let StatementKind::Update(update) = statement.kind() else {
            return Err(ExecutorError::InvalidStatement(
                "executeUpdate on a query".to_string(),
            ));
        };
        let partitions = targets(partitions, statement);
        tracing::debug!(
            table = %update.table,
            structural = update.is_structural(),
            partitions = ?partitions,
            "Dispatching update"
        );
        Ok(Box::new(UpdateExecution::new(
            update.clone(),
            statement.parameters().to_vec(),
            session.clone(),
            partitions,
            self.txn_manager.clone(),
            self.runtime.clone(),
        )))
    }
}
