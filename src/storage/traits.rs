//! Storage engine trait definition

use async_trait::async_trait;

use crate::executor::{Datum, Row, RowKey};
use crate::storage::error::StorageResult;

/// Identifier of a storage partition
pub type PartitionKey = String;

/// A stored row with its key
pub type KeyedRow = (RowKey, Row);

/// Abstract storage engine interface
///
/// Rows live in named tables, keyed by [`RowKey`] and spread over partitions.
/// Scans return rows in key order. Every call may complete asynchronously;
/// callers running on the cooperative scheduler park their task meanwhile.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Create an empty table
    async fn create_table(&self, table: &str) -> StorageResult<()>;

    /// Scan a table in key order
    ///
    /// With `partitions`, only rows stored in one of those partitions are
    /// returned.
    async fn scan(
        &self,
        table: &str,
        partitions: Option<&[PartitionKey]>,
    ) -> StorageResult<Vec<KeyedRow>>;

    /// Get a row by key
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<Row>>;

    /// Insert a new row into a partition
    ///
    /// Fails with `DuplicateKey` if the key exists.
    async fn insert(
        &self,
        table: &str,
        partition: &str,
        key: RowKey,
        row: Row,
    ) -> StorageResult<()>;

    /// Overwrite individual columns of a row in place
    ///
    /// Returns the previous value of every assigned column, in assignment
    /// order. Either all assignments apply or none do.
    async fn update_columns(
        &self,
        table: &str,
        key: &RowKey,
        assignments: &[(usize, Datum)],
    ) -> StorageResult<Vec<(usize, Datum)>>;

    /// Delete a row
    ///
    /// Returns the partition and contents of the removed row, or `None` if
    /// the key did not exist.
    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<Option<(PartitionKey, Row)>>;

    /// Partition currently storing a row
    async fn partition_of(&self, table: &str, key: &RowKey) -> StorageResult<Option<PartitionKey>>;

    /// Close the storage engine
    async fn close(&self) -> StorageResult<()>;
}
