//! Transaction manager - central coordinator for local transaction branches
//!
//! Manages the lifecycle of transactions including:
//! - BEGIN: Allocate a transaction ID and branch name
//! - COMMIT: Drop the undo log, release locks
//! - ROLLBACK: Apply the undo log in reverse, release locks

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::transaction::{parse_branch_name, NAME_SEPARATOR};
use super::{
    LocalTransaction, TimeoutConfig, TransactionError, TransactionResult, UndoAction, UndoLog,
};
use crate::executor::{Datum, Row, RowKey};
use crate::lock::{LockManager, TxnId};
use crate::storage::{PartitionKey, StorageEngine};

/// Transaction manager for one storage node
pub struct TransactionManager {
    /// Prefix of every branch name issued here
    node_name: String,

    /// Next transaction ID to assign
    next_txn_id: AtomicU64,

    /// Currently active transactions
    active_transactions: RwLock<HashMap<TxnId, LocalTransaction>>,

    /// Undo log for rollback
    undo_log: UndoLog,

    /// Timeout configuration
    timeout_config: RwLock<TimeoutConfig>,

    locks: Arc<LockManager>,

    /// Storage engine reference (for rollback operations)
    storage: Arc<dyn StorageEngine>,
}

impl TransactionManager {
    /// Create a transaction manager for the node `node_name`
    ///
    /// Separator characters in the node name are replaced so branch names
    /// stay parseable.
    pub fn new(
        node_name: &str,
        storage: Arc<dyn StorageEngine>,
        locks: Arc<LockManager>,
    ) -> Self {
        let node_name = node_name
            .replace(NAME_SEPARATOR, "_")
            .replace(crate::protocol::NAME_DELIMITER, "_");
        Self {
            node_name,
            // Start at 1 so 0 can be used as "no transaction"
            next_txn_id: AtomicU64::new(1),
            active_transactions: RwLock::new(HashMap::new()),
            undo_log: UndoLog::new(),
            timeout_config: RwLock::new(TimeoutConfig::default()),
            locks,
            storage,
        }
    }

    /// Node name used in branch names
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Lock manager shared by this node's transactions
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Storage engine rollback writes to
    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Update timeout configuration
    pub fn set_timeout_config(&self, config: TimeoutConfig) {
        *self.timeout_config.write() = config;
    }

    /// Get timeout configuration
    pub fn timeout_config(&self) -> TimeoutConfig {
        self.timeout_config.read().clone()
    }

    /// Configured lock wait timeout
    pub fn lock_timeout(&self) -> Duration {
        self.timeout_config.read().lock_timeout
    }

    /// Begin a new transaction branch
    pub fn begin(&self) -> LocalTransaction {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = LocalTransaction::new(txn_id, &self.node_name);
        self.active_transactions.write().insert(txn_id, txn.clone());
        tracing::debug!(txn_id, name = %txn.name, "Began transaction");
        txn
    }

    /// Commit a transaction
    ///
    /// Writes are already in storage; committing discards the undo records
    /// and releases every lock the transaction holds.
    pub fn commit(&self, txn_id: TxnId) -> TransactionResult<()> {
        self.finish(txn_id)?;
        let undo_records = self.undo_log.discard(txn_id);
        let released = self.locks.release(txn_id);
        tracing::debug!(txn_id, undo_records, released, "Committed transaction");
        Ok(())
    }

    /// Rollback a transaction
    ///
    /// Applies undo records in reverse order to restore previous state, then
    /// releases the transaction's locks. Locks are released even when an undo
    /// step fails.
    pub async fn rollback(&self, txn_id: TxnId) -> TransactionResult<()> {
        self.finish(txn_id)?;

        let result = self.apply_undo(txn_id).await;
        let released = self.locks.release(txn_id);
        match &result {
            Ok(()) => tracing::debug!(txn_id, released, "Rolled back transaction"),
            Err(e) => tracing::warn!(txn_id, released, error = %e, "Rollback failed to restore rows"),
        }
        result
    }

    /// Commit a branch by its name
    pub fn commit_by_name(&self, name: &str) -> TransactionResult<()> {
        let txn_id = self.resolve_name(name)?;
        self.commit(txn_id)
    }

    /// Roll back a branch by its name
    pub async fn rollback_by_name(&self, name: &str) -> TransactionResult<()> {
        let txn_id = self.resolve_name(name)?;
        self.rollback(txn_id).await
    }

    /// Record an insert for rollback
    pub fn record_insert(&self, txn_id: TxnId, table: &str, key: RowKey) -> TransactionResult<()> {
        self.check_active(txn_id)?;
        self.undo_log.log_insert(txn_id, table, key);
        Ok(())
    }

    /// Record overwritten column values for rollback
    pub fn record_update(
        &self,
        txn_id: TxnId,
        table: &str,
        key: RowKey,
        old_values: Vec<(usize, Datum)>,
    ) -> TransactionResult<()> {
        self.check_active(txn_id)?;
        self.undo_log.log_update(txn_id, table, key, old_values);
        Ok(())
    }

    /// Record a deleted row for rollback
    pub fn record_delete(
        &self,
        txn_id: TxnId,
        table: &str,
        key: RowKey,
        partition: PartitionKey,
        row: Row,
    ) -> TransactionResult<()> {
        self.check_active(txn_id)?;
        self.undo_log.log_delete(txn_id, table, key, partition, row);
        Ok(())
    }

    /// Check if a transaction is active
    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.active_transactions.read().contains_key(&txn_id)
    }

    /// Get count of active transactions
    pub fn active_count(&self) -> usize {
        self.active_transactions.read().len()
    }

    fn check_active(&self, txn_id: TxnId) -> TransactionResult<()> {
        if self.is_active(txn_id) {
            Ok(())
        } else {
            Err(TransactionError::NotFound(txn_id))
        }
    }

    /// Remove an active transaction, the first step of commit and rollback
    fn finish(&self, txn_id: TxnId) -> TransactionResult<()> {
        self.active_transactions
            .write()
            .remove(&txn_id)
            .map(|_| ())
            .ok_or(TransactionError::NotFound(txn_id))
    }

    fn resolve_name(&self, name: &str) -> TransactionResult<TxnId> {
        match parse_branch_name(name) {
            Some((node, txn_id)) if node == self.node_name => Ok(txn_id),
            _ => Err(TransactionError::UnknownBranch(name.to_string())),
        }
    }

    async fn apply_undo(&self, txn_id: TxnId) -> TransactionResult<()> {
        for record in self.undo_log.take_reversed(txn_id) {
            let table = &record.table_name;
            match record.action {
                UndoAction::Insert => {
                    self.storage.delete(table, &record.row_key).await?;
                }
                UndoAction::Update { old_values } => {
                    self.storage
                        .update_columns(table, &record.row_key, &old_values)
                        .await?;
                }
                UndoAction::Delete { partition, row } => {
                    self.storage
                        .insert(table, &partition, record.row_key, row)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, DEFAULT_PARTITION};

    async fn setup() -> TransactionManager {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_table("t").await.unwrap();
        storage
            .insert(
                "t",
                DEFAULT_PARTITION,
                RowKey::from(1),
                Row::new(vec![Datum::Int(1), Datum::Int(10), Datum::Int(20)]),
            )
            .await
            .unwrap();
        TransactionManager::new("node1", storage, Arc::new(LockManager::new()))
    }

    #[tokio::test]
    async fn test_begin_and_commit() {
        let mgr = setup().await;
        let txn = mgr.begin();
        assert_eq!(txn.txn_id, 1);
        assert_eq!(txn.name, "node1:1");
        assert!(mgr.is_active(txn.txn_id));

        mgr.commit(txn.txn_id).unwrap();
        assert!(!mgr.is_active(txn.txn_id));
        assert_eq!(mgr.commit(txn.txn_id), Err(TransactionError::NotFound(1)));
    }

    #[tokio::test]
    async fn test_finished_branch_rejects_writes() {
        let mgr = setup().await;
        let txn = mgr.begin();
        mgr.rollback(txn.txn_id).await.unwrap();

        assert_eq!(
            mgr.record_insert(txn.txn_id, "t", RowKey::from(2)),
            Err(TransactionError::NotFound(txn.txn_id))
        );
        assert_eq!(
            mgr.rollback(txn.txn_id).await,
            Err(TransactionError::NotFound(txn.txn_id))
        );
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_restores_columns() {
        let mgr = setup().await;
        let txn = mgr.begin();
        let key = RowKey::from(1);

        let old = mgr
            .storage()
            .update_columns("t", &key, &[(1, Datum::Int(11))])
            .await
            .unwrap();
        mgr.record_update(txn.txn_id, "t", key.clone(), old).unwrap();

        mgr.rollback(txn.txn_id).await.unwrap();
        let row = mgr.storage().get("t", &key).await.unwrap().unwrap();
        assert_eq!(row.get(1).unwrap(), &Datum::Int(10));
    }

    #[tokio::test]
    async fn test_rollback_releases_locks() {
        let mgr = setup().await;
        let txn = mgr.begin();
        mgr.lock_manager()
            .acquire_column("t", &RowKey::from(1), 1, txn.txn_id, Duration::from_millis(10))
            .await
            .unwrap();

        mgr.rollback_by_name(&txn.name).await.unwrap();
        assert_eq!(mgr.lock_manager().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_branch_names_are_node_scoped() {
        let mgr = setup().await;
        let txn = mgr.begin();
        assert!(matches!(
            mgr.commit_by_name(&format!("other:{}", txn.txn_id)),
            Err(TransactionError::UnknownBranch(_))
        ));
        mgr.commit_by_name(&txn.name).unwrap();
    }

    #[tokio::test]
    async fn test_node_name_sanitized() {
        let storage = Arc::new(MemoryStorage::new());
        let mgr = TransactionManager::new("a:b,c", storage, Arc::new(LockManager::new()));
        assert_eq!(mgr.node_name(), "a_b_c");
    }
}
