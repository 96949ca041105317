//! Local transaction management
//!
//! A storage node runs every write inside a local transaction (a *branch*).
//! Branches are named `<node>:<id>` so a distributed coordinator can commit or
//! roll back each one it learned about from a put acknowledgment.
//!
//! Column writes are recorded in an undo log; rollback applies it in reverse.
//! Both commit and rollback release the branch's locks through the
//! [`LockManager`](crate::lock::LockManager).

mod manager;
mod transaction;
mod undo_log;

pub use manager::TransactionManager;
pub use transaction::{parse_branch_name, LocalTransaction};
pub use undo_log::{UndoAction, UndoLog, UndoRecord};

use std::time::Duration;
use thiserror::Error;

use crate::lock::TxnId;

/// Transaction operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Transaction not found
    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    /// Branch name not owned by this node or malformed
    #[error("Unknown transaction branch: {0}")]
    UnknownBranch(String),

    /// Storage error during transaction operation
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Timeout configuration for transactions
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Fail a statement waiting for a row or column lock longer than this
    /// Default: 1 second
    pub lock_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(1),
        }
    }
}

impl TimeoutConfig {
    /// Set the lock wait timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
