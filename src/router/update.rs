//! Update execution
//!
//! Runs in phases: load the matching rows, take every lock the update
//! needs, write, then commit when the session is in autocommit mode. Lock
//! waits never block the worker: a conflicting request is queued in the lock
//! table and the task is re-queued as blocked until it is granted or its
//! deadline passes.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;

use crate::command::Session;
use crate::executor::update::apply_assignments;
use crate::executor::{
    Datum, ExecutorError, ExecutorResult, RowKey, Update, YieldCheckpoint,
};
use crate::lock::{LockScope, LockStatus, TxnId};
use crate::scheduler::{Pending, TaskContext};
use crate::storage::{KeyedRow, PartitionKey, StorageError, StorageResult};
use crate::txn::{TransactionManager, TransactionResult};

use super::{Execution, Progress};

/// One lock the update needs before writing
#[derive(Debug, Clone)]
struct LockRequest {
    row: RowKey,
    scope: LockScope,
}

/// A matched row and, for key changes, the key it moves to
#[derive(Debug, Clone)]
struct Target {
    key: RowKey,
    new_key: Option<RowKey>,
}

enum Phase {
    Begin,
    Load(Option<Pending<StorageResult<Vec<KeyedRow>>>>),
    Lock {
        next: usize,
        /// Deadline of the request currently waiting
        deadline: Option<Instant>,
    },
    Write(Option<Pending<ExecutorResult<u64>>>),
    Rollback {
        pending: Pending<TransactionResult<()>>,
        error: ExecutorError,
    },
    Done,
}

/// One execution of an UPDATE
pub struct UpdateExecution {
    update: Arc<Update>,
    params: Vec<Datum>,
    session: Arc<Session>,
    partitions: Option<Vec<PartitionKey>>,
    txn_manager: Arc<TransactionManager>,
    runtime: Handle,
    txn: Option<TxnId>,
    /// The transaction was opened for this statement alone
    autocommit: bool,
    assignments: Vec<(usize, Datum)>,
    targets: Vec<Target>,
    locks: Vec<LockRequest>,
    phase: Phase,
}

impl UpdateExecution {
    pub fn new(
        update: Arc<Update>,
        params: Vec<Datum>,
        session: Arc<Session>,
        partitions: Option<Vec<PartitionKey>>,
        txn_manager: Arc<TransactionManager>,
        runtime: Handle,
    ) -> Self {
        Self {
            update,
            params,
            session,
            partitions,
            txn_manager,
            runtime,
            txn: None,
            autocommit: false,
            assignments: Vec::new(),
            targets: Vec::new(),
            locks: Vec::new(),
            phase: Phase::Begin,
        }
    }

    fn txn(&self) -> ExecutorResult<TxnId> {
        self.txn
            .ok_or_else(|| ExecutorError::Internal("update has no transaction".to_string()))
    }

    /// Join the session's transaction or open one
    fn begin(&mut self) -> ExecutorResult<()> {
        self.assignments = self.update.resolve_assignments(&self.params)?;
        let txn_id = match self.session.current_txn() {
            Some(txn_id) => txn_id,
            None => {
                let txn_id = self.txn_manager.begin().txn_id;
                if self.session.autocommit() {
                    self.autocommit = true;
                } else {
                    // Manual commit mode: the statement starts the session's
                    // transaction
                    self.session.begin_transaction(txn_id);
                }
                txn_id
            }
        };
        self.txn = Some(txn_id);
        Ok(())
    }

    /// Pick the rows to change and plan their locks
    fn plan(&mut self, rows: Vec<KeyedRow>) -> ExecutorResult<()> {
        let structural = self.update.is_structural();
        let columns = self.update.assigned_columns();
        for (key, row) in rows {
            if !self.update.filter.matches(&row, &self.params)? {
                continue;
            }
            if structural {
                let new_key = self
                    .update
                    .key_of(&apply_assignments(&row, &self.assignments)?)?;
                self.locks.push(LockRequest {
                    row: key.clone(),
                    scope: LockScope::Row,
                });
                if new_key != key {
                    self.locks.push(LockRequest {
                        row: new_key.clone(),
                        scope: LockScope::Row,
                    });
                }
                self.targets.push(Target {
                    key,
                    new_key: Some(new_key),
                });
            } else {
                for &column in &columns {
                    self.locks.push(LockRequest {
                        row: key.clone(),
                        scope: LockScope::Column(column),
                    });
                }
                self.targets.push(Target { key, new_key: None });
            }
        }
        Ok(())
    }

    /// Take planned locks in order
    ///
    /// Returns `None` once every lock is held.
    fn lock(
        &mut self,
        cx: &mut TaskContext,
        mut next: usize,
        mut deadline: Option<Instant>,
    ) -> ExecutorResult<Option<Progress<u64>>> {
        let txn = self.txn()?;
        let lock_manager = self.txn_manager.lock_manager().clone();
        let lock_timeout = self.session.timeout_config().lock_timeout;
        let table = self.update.table.as_str();

        while let Some(request) = self.locks.get(next) {
            if cx.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            let wait_until = *deadline.get_or_insert_with(|| Instant::now() + lock_timeout);
            let status = match request.scope {
                LockScope::Row => lock_manager.try_lock_row(table, &request.row, txn, wait_until)?,
                LockScope::Column(column) => {
                    lock_manager.try_lock_column(table, &request.row, column, txn, wait_until)?
                }
            };
            match status {
                LockStatus::Granted => {
                    next += 1;
                    deadline = None;
                    if cx.yield_if_needed(next as i64) {
                        self.phase = Phase::Lock { next, deadline };
                        return Ok(Some(Progress::Yielded));
                    }
                }
                LockStatus::Waiting { blocker } => {
                    tracing::trace!(txn, blocker, row = %request.row, "Update waiting for lock");
                    self.phase = Phase::Lock { next, deadline };
                    return Ok(Some(Progress::Blocked));
                }
            }
        }
        Ok(None)
    }

    fn start_write(&self, cx: &TaskContext) -> ExecutorResult<Pending<ExecutorResult<u64>>> {
        let txn = self.txn()?;
        let txn_manager = self.txn_manager.clone();
        let update = self.update.clone();
        let assignments = self.assignments.clone();
        let targets = self.targets.clone();

        Ok(Pending::spawn(&self.runtime, cx.waker(), async move {
            let storage = txn_manager.storage().clone();
            let table = update.table.as_str();
            let mut affected = 0u64;
            for target in targets {
                match target.new_key {
                    Some(new_key) => {
                        // The row may have gone since it was read
                        let Some((partition, old_row)) = storage.delete(table, &target.key).await?
                        else {
                            continue;
                        };
                        txn_manager.record_delete(
                            txn,
                            table,
                            target.key.clone(),
                            partition.clone(),
                            old_row.clone(),
                        )?;
                        let new_row = apply_assignments(&old_row, &assignments)?;
                        storage
                            .insert(table, &partition, new_key.clone(), new_row)
                            .await?;
                        txn_manager.record_insert(txn, table, new_key)?;
                    }
                    None => {
                        match storage
                            .update_columns(table, &target.key, &assignments)
                            .await
                        {
                            Ok(old_values) => {
                                txn_manager.record_update(txn, table, target.key, old_values)?
                            }
                            Err(StorageError::RowNotFound { .. }) => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                affected += 1;
            }
            Ok::<u64, ExecutorError>(affected)
        }))
    }

    fn advance(&mut self, cx: &mut TaskContext) -> ExecutorResult<Progress<u64>> {
        loop {
            match &mut self.phase {
                Phase::Begin => {
                    self.begin()?;
                    let storage = self.txn_manager.storage().clone();
                    let table = self.update.table.clone();
                    let partitions = self.partitions.clone();
                    let pending = Pending::spawn(&self.runtime, cx.waker(), async move {
                        storage.scan(&table, partitions.as_deref()).await
                    });
                    self.phase = Phase::Load(Some(pending));
                    return Ok(Progress::Parked);
                }
                Phase::Load(None) => {
                    return Err(ExecutorError::Internal("update scan not started".to_string()))
                }
                Phase::Load(Some(pending)) => match pending.try_take()? {
                    None => return Ok(Progress::Parked),
                    Some(rows) => {
                        self.plan(rows?)?;
                        self.phase = Phase::Lock {
                            next: 0,
                            deadline: None,
                        };
                    }
                },
                Phase::Lock { next, deadline } => {
                    let (next, deadline) = (*next, *deadline);
                    if let Some(progress) = self.lock(cx, next, deadline)? {
                        return Ok(progress);
                    }
                    let pending = self.start_write(cx)?;
                    self.phase = Phase::Write(Some(pending));
                    return Ok(Progress::Parked);
                }
                Phase::Write(None) => {
                    return Err(ExecutorError::Internal("update write not started".to_string()))
                }
                Phase::Write(Some(pending)) => match pending.try_take()? {
                    None => return Ok(Progress::Parked),
                    Some(affected) => {
                        let affected = affected?;
                        let txn = self.txn()?;
                        if self.autocommit {
                            self.txn_manager.commit(txn)?;
                        }
                        tracing::debug!(
                            txn,
                            affected,
                            autocommit = self.autocommit,
                            table = %self.update.table,
                            "Update applied"
                        );
                        self.phase = Phase::Done;
                        return Ok(Progress::Ready(affected));
                    }
                },
                Phase::Rollback { .. } | Phase::Done => {
                    return Err(ExecutorError::Internal(
                        "update execution stepped after completion".to_string(),
                    ))
                }
            }
        }
    }

    /// Undo a failed autocommit statement before reporting `error`
    fn fail(&mut self, cx: &TaskContext, error: ExecutorError) -> ExecutorResult<Progress<u64>> {
        match (self.autocommit, self.txn) {
            (true, Some(txn)) if self.txn_manager.is_active(txn) => {
                tracing::debug!(txn, error = %error, "Rolling back failed update");
                let txn_manager = self.txn_manager.clone();
                let pending = Pending::spawn(&self.runtime, cx.waker(), async move {
                    txn_manager.rollback(txn).await
                });
                self.phase = Phase::Rollback { pending, error };
                Ok(Progress::Parked)
            }
            _ => {
                self.phase = Phase::Done;
                Err(error)
            }
        }
    }

    fn finish_rollback(&mut self) -> ExecutorResult<Progress<u64>> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Rollback { mut pending, error } => match pending.try_take() {
                Ok(None) => {
                    self.phase = Phase::Rollback { pending, error };
                    Ok(Progress::Parked)
                }
                Ok(Some(result)) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Rollback after failed update failed");
                    }
                    Err(error)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rollback after failed update was lost");
                    Err(error)
                }
            },
            other => {
                self.phase = other;
                Err(ExecutorError::Internal("no rollback in progress".to_string()))
            }
        }
    }
}

impl Execution<u64> for UpdateExecution {
    fn step(&mut self, cx: &mut TaskContext) -> ExecutorResult<Progress<u64>> {
        if matches!(self.phase, Phase::Rollback { .. }) {
            return self.finish_rollback();
        }
        match self.advance(cx) {
            Ok(progress) => Ok(progress),
            Err(error) if !matches!(self.phase, Phase::Done) => self.fail(cx, error),
            Err(error) => Err(error),
        }
    }
}
