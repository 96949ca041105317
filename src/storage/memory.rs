//! In-memory partitioned storage using BTreeMap
//!
//! Each table is a sorted map of row key to (partition, row). Key order is
//! scan order, independent of partition placement.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::{StorageError, StorageResult};
use super::traits::{KeyedRow, PartitionKey, StorageEngine};
use crate::executor::{Datum, Row, RowKey};

/// Partition used when a caller does not name one
pub const DEFAULT_PARTITION: &str = "p0";

#[derive(Debug, Clone)]
struct StoredRow {
    partition: PartitionKey,
    row: Row,
}

type Table = BTreeMap<RowKey, StoredRow>;

/// In-memory storage engine
pub struct MemoryStorage {
    tables: RwLock<HashMap<String, Table>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty storage engine
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn table_not_found(table: &str) -> StorageError {
    StorageError::TableNotFound(table.to_string())
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn create_table(&self, table: &str) -> StorageResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Err(StorageError::TableExists(table.to_string()));
        }
        tables.insert(table.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn scan(
        &self,
        table: &str,
        partitions: Option<&[PartitionKey]>,
    ) -> StorageResult<Vec<KeyedRow>> {
        self.check_open()?;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| table_not_found(table))?;
        Ok(rows
            .iter()
            .filter(|(_, stored)| partitions.map_or(true, |p| p.contains(&stored.partition)))
            .map(|(key, stored)| (key.clone(), stored.row.clone()))
            .collect())
    }

    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.check_open()?;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| table_not_found(table))?;
        Ok(rows.get(key).map(|stored| stored.row.clone()))
    }

    async fn insert(
        &self,
        table: &str,
        partition: &str,
        key: RowKey,
        row: Row,
    ) -> StorageResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        if rows.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        rows.insert(
            key,
            StoredRow {
                partition: partition.to_string(),
                row,
            },
        );
        Ok(())
    }

    async fn update_columns(
        &self,
        table: &str,
        key: &RowKey,
        assignments: &[(usize, Datum)],
    ) -> StorageResult<Vec<(usize, Datum)>> {
        self.check_open()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let stored = rows.get_mut(key).ok_or_else(|| StorageError::RowNotFound {
            table: table.to_string(),
            key: key.to_string(),
        })?;

        let width = stored.row.len();
        if let Some(&(index, _)) = assignments.iter().find(|(index, _)| *index >= width) {
            return Err(StorageError::InvalidColumn { index, width });
        }

        let mut old_values = Vec::with_capacity(assignments.len());
        for (index, value) in assignments {
            let old = stored
                .row
                .replace(*index, value.clone())
                .map_err(|_| StorageError::InvalidColumn {
                    index: *index,
                    width,
                })?;
            old_values.push((*index, old));
        }
        Ok(old_values)
    }

    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<Option<(PartitionKey, Row)>> {
        self.check_open()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        Ok(rows.remove(key).map(|stored| (stored.partition, stored.row)))
    }

    async fn partition_of(&self, table: &str, key: &RowKey) -> StorageResult<Option<PartitionKey>> {
        self.check_open()?;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| table_not_found(table))?;
        Ok(rows.get(key).map(|stored| stored.partition.clone()))
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[i64]) -> Row {
        Row::new(values.iter().map(|&v| Datum::Int(v)).collect())
    }

    #[tokio::test]
    async fn test_scan_in_key_order_by_partition() {
        let storage = MemoryStorage::new();
        storage.create_table("t").await.unwrap();
        storage.insert("t", "p1", RowKey::from(3), row(&[3])).await.unwrap();
        storage.insert("t", "p0", RowKey::from(1), row(&[1])).await.unwrap();
        storage.insert("t", "p1", RowKey::from(2), row(&[2])).await.unwrap();

        let all = storage.scan("t", None).await.unwrap();
        let keys: Vec<_> = all.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![RowKey::from(1), RowKey::from(2), RowKey::from(3)]);

        let p1 = storage.scan("t", Some(&["p1".to_string()])).await.unwrap();
        assert_eq!(p1.len(), 2);
    }

    #[tokio::test]
    async fn test_update_columns_returns_old_values() {
        let storage = MemoryStorage::new();
        storage.create_table("t").await.unwrap();
        storage.insert("t", DEFAULT_PARTITION, RowKey::from(1), row(&[1, 10, 20])).await.unwrap();

        let old = storage
            .update_columns("t", &RowKey::from(1), &[(2, Datum::Int(21))])
            .await
            .unwrap();
        assert_eq!(old, vec![(2, Datum::Int(20))]);

        let err = storage
            .update_columns("t", &RowKey::from(1), &[(1, Datum::Int(0)), (9, Datum::Null)])
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::InvalidColumn { index: 9, width: 3 });
        // Nothing applied on failure
        let current = storage.get("t", &RowKey::from(1)).await.unwrap().unwrap();
        assert_eq!(current, row(&[1, 10, 21]));
    }

    #[tokio::test]
    async fn test_duplicate_and_closed() {
        let storage = MemoryStorage::new();
        storage.create_table("t").await.unwrap();
        storage.insert("t", "p0", RowKey::from(1), row(&[1])).await.unwrap();
        assert!(matches!(
            storage.insert("t", "p0", RowKey::from(1), row(&[1])).await,
            Err(StorageError::DuplicateKey { .. })
        ));

        storage.close().await.unwrap();
        assert_eq!(storage.get("t", &RowKey::from(1)).await, Err(StorageError::Closed));
    }
}
