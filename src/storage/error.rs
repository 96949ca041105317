//! Storage error types

use thiserror::Error;

/// Storage operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Row does not exist
    #[error("Row {key} not found in {table}")]
    RowNotFound { table: String, key: String },

    /// Insert of an existing key
    #[error("Duplicate key {key} in {table}")]
    DuplicateKey { table: String, key: String },

    /// Column index past the row width
    #[error("Column {index} out of range (row has {width} columns)")]
    InvalidColumn { index: usize, width: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage is closed
    #[error("Storage is closed")]
    Closed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
