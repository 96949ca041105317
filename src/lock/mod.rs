//! Row and column lock manager
//!
//! Locks are taken per row of a table, at one of two granularities:
//! - **Row lock**: exclusive right to change the row's structure (key change,
//!   insert, delete). At most one transaction holds it, and it excludes every
//!   other transaction's column locks on the same row.
//! - **Column lock**: exclusive right to change one column's value. Two
//!   transactions holding locks on disjoint columns of the same row never
//!   conflict, so concurrent value updates to different columns proceed.
//!
//! There is no deadlock detection. Every wait is bounded by a deadline, after
//! which the request fails with [`LockError::Timeout`] and the caller decides
//! whether to retry, abort or surface the error.
//!
//! Locks are released all at once per transaction by [`LockManager::release`]
//! when the transaction commits or rolls back, in any order relative to other
//! transactions.

mod key;
mod manager;
mod table;

pub use key::{ColumnId, LockScope, RowLockKey};
pub use manager::{LockManager, LockStatus, DEFAULT_SHARD_COUNT};

use std::time::Duration;

use thiserror::Error;

/// Transaction identifier used by the lock manager
pub type TxnId = u64;

/// Lock acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The request waited past its deadline while another transaction held
    /// (or queued ahead for) a conflicting lock. Retryable.
    #[error("Lock timeout on {target} after {waited:?}: blocked by transaction {blocker}")]
    Timeout {
        target: String,
        blocker: TxnId,
        waited: Duration,
    },
}

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;
