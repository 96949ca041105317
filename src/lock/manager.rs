//! Lock manager - grants, queues and releases row and column locks

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::key::{ColumnId, LockScope, RowLockKey};
use super::table::LockTable;
use super::{LockError, LockResult, TxnId};
use crate::executor::RowKey;

/// Default number of lock table shards
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Outcome of a non-blocking lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is held by the requester
    Granted,
    /// The requester is queued behind `blocker`; retry before the deadline
    Waiting { blocker: TxnId },
}

/// Row and column lock manager
///
/// Shared by every transaction of a storage node through an `Arc`. Two
/// families of entry points exist:
/// - `try_lock_*` never blocks. A conflicting request is queued and reported as
///   [`LockStatus::Waiting`]; the caller retries later (typically after the
///   scheduler re-queues its task) with the same deadline.
/// - `acquire_*` waits asynchronously until the lock is granted or the
///   timeout expires.
pub struct LockManager {
    table: LockTable,
    /// Keys each transaction holds or waits on, for release
    by_txn: Mutex<HashMap<TxnId, HashSet<RowLockKey>>>,
}

impl LockManager {
    /// Create a lock manager with the default shard count
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    /// Create a lock manager with a specific shard count
    pub fn with_shards(shard_count: usize) -> Self {
        Self {
            table: LockTable::new(shard_count),
            by_txn: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take the row lock without blocking
    pub fn try_lock_row(
        &self,
        table: &str,
        row: &RowKey,
        txn: TxnId,
        deadline: Instant,
    ) -> LockResult<LockStatus> {
        let key = RowLockKey::new(table, row.clone());
        self.try_lock(&key, LockScope::Row, txn, deadline)
    }

    /// Try to take a column lock without blocking
    pub fn try_lock_column(
        &self,
        table: &str,
        row: &RowKey,
        column: ColumnId,
        txn: TxnId,
        deadline: Instant,
    ) -> LockResult<LockStatus> {
        let key = RowLockKey::new(table, row.clone());
        self.try_lock(&key, LockScope::Column(column), txn, deadline)
    }

    /// Take the row lock, waiting up to `timeout`
    pub async fn acquire_row(
        &self,
        table: &str,
        row: &RowKey,
        txn: TxnId,
        timeout: Duration,
    ) -> LockResult<()> {
        let key = RowLockKey::new(table, row.clone());
        self.acquire(key, LockScope::Row, txn, timeout).await
    }

    /// Take a column lock, waiting up to `timeout`
    ///
    /// Only a lock on the same column (or the row lock) held by another
    /// transaction makes this wait.
    pub async fn acquire_column(
        &self,
        table: &str,
        row: &RowKey,
        column: ColumnId,
        txn: TxnId,
        timeout: Duration,
    ) -> LockResult<()> {
        let key = RowLockKey::new(table, row.clone());
        self.acquire(key, LockScope::Column(column), txn, timeout)
            .await
    }

    /// Release every lock held, and every wait queued, by `txn`
    ///
    /// Returns the number of locks released. Called on commit and on
    /// rollback; transactions may release in any order.
    pub fn release(&self, txn: TxnId) -> usize {
        let keys = self.by_txn.lock().remove(&txn).unwrap_or_default();
        let mut released = 0;

        for key in keys {
            let shard = self.table.shard(&key);
            {
                let mut entries = shard.entries.lock();
                if let Some(state) = entries.get_mut(&key) {
                    released += state.release(txn);
                    if state.is_empty() {
                        entries.remove(&key);
                    }
                }
            }
            shard.released.notify_waiters();
        }

        tracing::debug!(txn, released, "Released locks");
        released
    }

    /// Current row-lock holder of a row
    pub fn row_holder(&self, table: &str, row: &RowKey) -> Option<TxnId> {
        self.with_state(table, row, |state| state.row_holder())
    }

    /// Current holder of a column lock
    pub fn column_holder(&self, table: &str, row: &RowKey, column: ColumnId) -> Option<TxnId> {
        self.with_state(table, row, |state| state.column_holder(column))
    }

    /// Number of requests queued on a row
    pub fn waiter_count(&self, table: &str, row: &RowKey) -> usize {
        self.with_state(table, row, |state| Some(state.waiter_count()))
            .unwrap_or(0)
    }

    /// Number of rows with any lock state
    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    /// Number of rows `txn` holds or waits on
    pub fn rows_touched(&self, txn: TxnId) -> usize {
        self.by_txn.lock().get(&txn).map_or(0, HashSet::len)
    }

    fn with_state<T>(
        &self,
        table: &str,
        row: &RowKey,
        f: impl FnOnce(&super::table::RowLockState) -> Option<T>,
    ) -> Option<T> {
        let key = RowLockKey::new(table, row.clone());
        let entries = self.table.shard(&key).entries.lock();
        entries.get(&key).and_then(f)
    }

    fn try_lock(
        &self,
        key: &RowLockKey,
        scope: LockScope,
        txn: TxnId,
        deadline: Instant,
    ) -> LockResult<LockStatus> {
        let now = Instant::now();
        let shard = self.table.shard(key);
        let mut entries = shard.entries.lock();
        let state = entries.entry(key.clone()).or_default();

        if state.holds(txn, scope) {
            return Ok(LockStatus::Granted);
        }

        // Requests queued behind a dropped waiter may now be grantable
        let mut dequeued = state.prune_expired(now, txn) > 0;
        let blocker = state
            .conflicting_holder(txn, scope)
            .or_else(|| state.conflicting_waiter_ahead(txn, scope));

        let status = match blocker {
            None => {
                state.grant(txn, scope);
                LockStatus::Granted
            }
            Some(blocker) if now >= deadline => {
                let since = match state.remove_waiter(txn, scope) {
                    Some(waiter) => {
                        dequeued = true;
                        waiter.since
                    }
                    None => now,
                };
                if state.is_empty() {
                    entries.remove(key);
                }
                drop(entries);
                if dequeued {
                    shard.released.notify_waiters();
                }
                let target = key.describe(scope);
                tracing::debug!(txn, blocker, target = %target, "Lock wait timed out");
                return Err(LockError::Timeout {
                    target,
                    blocker,
                    waited: now.saturating_duration_since(since),
                });
            }
            Some(blocker) => {
                state.enqueue(txn, scope, now, deadline);
                LockStatus::Waiting { blocker }
            }
        };
        drop(entries);
        if dequeued {
            shard.released.notify_waiters();
        }

        self.by_txn
            .lock()
            .entry(txn)
            .or_default()
            .insert(key.clone());
        Ok(status)
    }

    async fn acquire(
        &self,
        key: RowLockKey,
        scope: LockScope,
        txn: TxnId,
        timeout: Duration,
    ) -> LockResult<()> {
        let deadline = Instant::now() + timeout;
        let shard = self.table.shard(&key);

        loop {
            // Register for wakeups before checking, so a release between the
            // check and the wait is not missed
            let notified = shard.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_lock(&key, scope, txn, deadline)? {
                LockStatus::Granted => return Ok(()),
                LockStatus::Waiting { blocker } => {
                    tracing::trace!(txn, blocker, row = %key, "Waiting for lock");
                    let wake_at = tokio::time::Instant::from_std(deadline);
                    let _ = tokio::time::timeout_at(wake_at, notified).await;
                }
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn key(s: &str) -> RowKey {
        RowKey::from(s)
    }

    #[tokio::test]
    async fn test_disjoint_columns_proceed() {
        let locks = LockManager::new();
        locks.acquire_column("t", &key("1"), 1, 10, TIMEOUT).await.unwrap();
        locks.acquire_column("t", &key("1"), 2, 20, TIMEOUT).await.unwrap();

        assert_eq!(locks.column_holder("t", &key("1"), 1), Some(10));
        assert_eq!(locks.column_holder("t", &key("1"), 2), Some(20));
    }

    #[tokio::test]
    async fn test_same_column_times_out() {
        let locks = LockManager::new();
        locks.acquire_column("t", &key("1"), 1, 10, TIMEOUT).await.unwrap();

        let err = locks
            .acquire_column("t", &key("1"), 1, 30, Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            LockError::Timeout { blocker, target, .. } => {
                assert_eq!(blocker, 10);
                assert_eq!(target, "Column(t:1:1)");
            }
        }
        // The timed-out request left no waiter behind
        assert_eq!(locks.waiter_count("t", &key("1")), 0);
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let locks = Arc::new(LockManager::new());
        locks.acquire_row("t", &key("1"), 1, TIMEOUT).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire_row("t", &key("1"), 2, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(locks.release(1), 1);

        waiter.await.unwrap().unwrap();
        assert_eq!(locks.row_holder("t", &key("1")), Some(2));
    }

    #[tokio::test]
    async fn test_row_lock_excludes_columns() {
        let locks = LockManager::new();
        locks.acquire_column("t", &key("1"), 3, 1, TIMEOUT).await.unwrap();

        let deadline = Instant::now() + TIMEOUT;
        assert_eq!(
            locks.try_lock_row("t", &key("1"), 2, deadline).unwrap(),
            LockStatus::Waiting { blocker: 1 }
        );
        // Column 4 must queue behind the pending row request
        assert_eq!(
            locks.try_lock_column("t", &key("1"), 4, 3, deadline).unwrap(),
            LockStatus::Waiting { blocker: 2 }
        );
    }

    #[test]
    fn test_reentrant_and_upgrade() {
        let locks = LockManager::new();
        let deadline = Instant::now() + TIMEOUT;
        let row = key("1");

        assert_eq!(locks.try_lock_column("t", &row, 1, 7, deadline).unwrap(), LockStatus::Granted);
        assert_eq!(locks.try_lock_column("t", &row, 1, 7, deadline).unwrap(), LockStatus::Granted);
        assert_eq!(locks.try_lock_row("t", &row, 7, deadline).unwrap(), LockStatus::Granted);
        assert_eq!(locks.try_lock_column("t", &row, 9, 7, deadline).unwrap(), LockStatus::Granted);

        assert_eq!(locks.release(7), 2);
        assert_eq!(locks.entry_count(), 0);
    }

    #[test]
    fn test_sole_column_holder_upgrades_past_queued_waiter() {
        let locks = LockManager::new();
        let deadline = Instant::now() + TIMEOUT;
        let row = key("1");

        assert_eq!(locks.try_lock_column("t", &row, 1, 1, deadline).unwrap(), LockStatus::Granted);
        assert_eq!(
            locks.try_lock_column("t", &row, 1, 3, deadline).unwrap(),
            LockStatus::Waiting { blocker: 1 }
        );
        assert_eq!(locks.try_lock_row("t", &row, 1, deadline).unwrap(), LockStatus::Granted);
        assert_eq!(locks.row_holder("t", &row), Some(1));

        // The queued request now waits on the row lock
        assert_eq!(
            locks.try_lock_column("t", &row, 1, 3, deadline).unwrap(),
            LockStatus::Waiting { blocker: 1 }
        );
        locks.release(1);
        assert_eq!(locks.try_lock_column("t", &row, 1, 3, deadline).unwrap(), LockStatus::Granted);
    }

    #[tokio::test]
    async fn test_timed_out_waiter_wakes_requests_behind_it() {
        let locks = Arc::new(LockManager::new());
        let row = key("1");
        locks.acquire_column("t", &row, 3, 1, TIMEOUT).await.unwrap();

        let row_waiter = {
            let locks = locks.clone();
            let row = row.clone();
            tokio::spawn(async move {
                locks.acquire_row("t", &row, 2, Duration::from_millis(50)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Column 4 queues behind the pending row request
        let started = Instant::now();
        let column_waiter = {
            let locks = locks.clone();
            let row = row.clone();
            tokio::spawn(async move {
                locks.acquire_column("t", &row, 4, 3, Duration::from_secs(5)).await
            })
        };

        assert!(row_waiter.await.unwrap().is_err());
        tokio::time::timeout(Duration::from_secs(1), column_waiter)
            .await
            .expect("column request should be granted once the row request gives up")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(locks.column_holder("t", &row, 4), Some(3));
    }

    #[test]
    fn test_expired_deadline_fails() {
        let locks = LockManager::new();
        let row = key("1");
        let deadline = Instant::now() + TIMEOUT;
        locks.try_lock_row("t", &row, 1, deadline).unwrap();

        let past = Instant::now();
        assert!(locks.try_lock_row("t", &row, 2, past).is_err());
        assert_eq!(locks.rows_touched(1), 1);
    }
}
