//! Query execution: load candidate rows, then scan them in slices

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::executor::{
    Datum, ExecutorError, ExecutorResult, QueryResult, RunStatus, Select, SelectRun,
};
use crate::scheduler::{Pending, TaskContext};
use crate::storage::{KeyedRow, PartitionKey, StorageEngine, StorageResult};

use super::{Execution, Progress};

enum Phase {
    /// Waiting for the table scan
    Load(Option<Pending<StorageResult<Vec<KeyedRow>>>>),
    Scan,
    Done,
}

/// One execution of a SELECT
pub struct QueryExecution {
    run: SelectRun,
    partitions: Option<Vec<PartitionKey>>,
    storage: Arc<dyn StorageEngine>,
    runtime: Handle,
    phase: Phase,
}

impl QueryExecution {
    pub fn new(
        select: Arc<Select>,
        params: Vec<Datum>,
        max_rows: i32,
        partitions: Option<Vec<PartitionKey>>,
        storage: Arc<dyn StorageEngine>,
        runtime: Handle,
    ) -> Self {
        Self {
            run: SelectRun::new(select, params, max_rows),
            partitions,
            storage,
            runtime,
            phase: Phase::Load(None),
        }
    }

    fn start_load(&self, cx: &TaskContext) -> Pending<StorageResult<Vec<KeyedRow>>> {
        let storage = self.storage.clone();
        let table = self.run.select().table.clone();
        let partitions = self.partitions.clone();
        Pending::spawn(&self.runtime, cx.waker(), async move {
            storage.scan(&table, partitions.as_deref()).await
        })
    }
}

impl Execution<QueryResult> for QueryExecution {
    fn step(&mut self, cx: &mut TaskContext) -> ExecutorResult<Progress<QueryResult>> {
        loop {
            match &mut self.phase {
                Phase::Load(None) => {
                    let pending = self.start_load(cx);
                    self.phase = Phase::Load(Some(pending));
                    return Ok(Progress::Parked);
                }
                Phase::Load(Some(pending)) => match pending.try_take()? {
                    None => return Ok(Progress::Parked),
                    Some(rows) => {
                        let rows = rows?;
                        tracing::trace!(
                            task_id = cx.task_id(),
                            rows = rows.len(),
                            "Query rows loaded"
                        );
                        self.phase = Phase::Scan;
                        self.run.start(rows)?;
                    }
                },
                Phase::Scan => match self.run.run(cx)? {
                    RunStatus::Suspended(_) => return Ok(Progress::Yielded),
                    RunStatus::Finished => {
                        self.phase = Phase::Done;
                        return self.run.stop().map(Progress::Ready);
                    }
                },
                Phase::Done => {
                    return Err(ExecutorError::Internal(
                        "query execution stepped after completion".to_string(),
                    ))
                }
            }
        }
    }
}

impl Drop for QueryExecution {
    fn drop(&mut self) {
        // Release the buffer of a query abandoned mid-scan
        if matches!(self.phase, Phase::Scan) {
            self.run.abort();
        }
    }
}
