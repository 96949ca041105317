//! Executor error types

use std::fmt;

use crate::lock::LockError;
use crate::storage::StorageError;
use crate::txn::TransactionError;

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Executor errors
///
/// The statement-level umbrella: whatever goes wrong while a statement runs
/// ends up here, is stored in the command task's result slot, and reaches the
/// session as its pending exception.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// Storage layer error
    Storage(StorageError),

    /// Transaction error
    Transaction(TransactionError),

    /// Lock wait timed out
    Lock(LockError),

    /// Column index out of bounds
    ColumnIndexOutOfBounds { index: usize, row_len: usize },

    /// Bind parameter missing
    InvalidParameter { index: usize, count: usize },

    /// Value of the wrong type, e.g. a non-integer OFFSET
    TypeMismatch { expected: &'static str, context: String },

    /// Statement used with the wrong kind of execution
    InvalidStatement(String),

    /// Statement cancelled by its session
    Cancelled,

    /// Internal executor error
    Internal(String),
}

impl ExecutorError {
    /// Whether re-running the statement may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Lock(LockError::Timeout { .. }))
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Storage(e) => write!(f, "storage error: {}", e),
            ExecutorError::Transaction(e) => write!(f, "transaction error: {}", e),
            ExecutorError::Lock(e) => write!(f, "lock error: {}", e),
            ExecutorError::ColumnIndexOutOfBounds { index, row_len } => {
                write!(
                    f,
                    "column index {} out of bounds (row has {} columns)",
                    index, row_len
                )
            }
            ExecutorError::InvalidParameter { index, count } => {
                write!(
                    f,
                    "parameter {} not bound ({} parameters given)",
                    index, count
                )
            }
            ExecutorError::TypeMismatch { expected, context } => {
                write!(f, "type mismatch: expected {} in {}", expected, context)
            }
            ExecutorError::InvalidStatement(msg) => write!(f, "invalid statement: {}", msg),
            ExecutorError::Cancelled => write!(f, "statement cancelled"),
            ExecutorError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutorError::Storage(e) => Some(e),
            ExecutorError::Transaction(e) => Some(e),
            ExecutorError::Lock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for ExecutorError {
    fn from(e: StorageError) -> Self {
        ExecutorError::Storage(e)
    }
}

impl From<TransactionError> for ExecutorError {
    fn from(e: TransactionError) -> Self {
        // Storage failures surface the same way wherever they happen
        match e {
            TransactionError::Storage(e) => ExecutorError::Storage(e),
            other => ExecutorError::Transaction(other),
        }
    }
}

impl From<LockError> for ExecutorError {
    fn from(e: LockError) -> Self {
        ExecutorError::Lock(e)
    }
}
