//! Undo log for transaction rollback
//!
//! Each write a transaction makes is preceded by a record of how to reverse it.
//! Records are:
//! - Added during insert, column update and delete
//! - Applied in reverse order during rollback
//! - Discarded when the transaction commits

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::executor::{Datum, Row, RowKey};
use crate::lock::TxnId;
use crate::storage::PartitionKey;

/// How to reverse one write
#[derive(Debug, Clone, PartialEq)]
pub enum UndoAction {
    /// Row was inserted - rollback by deleting
    Insert,
    /// Columns were overwritten - rollback by restoring the old values
    Update { old_values: Vec<(usize, Datum)> },
    /// Row was deleted - rollback by re-inserting it
    Delete { partition: PartitionKey, row: Row },
}

/// A single undo record
#[derive(Debug, Clone)]
pub struct UndoRecord {
    /// Transaction that made the write
    pub txn_id: TxnId,

    /// Table name
    pub table_name: String,

    /// The row's primary key
    pub row_key: RowKey,

    /// Reversal of the write
    pub action: UndoAction,
}

/// Undo log manager
pub struct UndoLog {
    /// Undo records indexed by transaction ID, in write order
    records: RwLock<HashMap<TxnId, Vec<UndoRecord>>>,
}

impl UndoLog {
    /// Create a new undo log
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Log an insert; rollback deletes the row
    pub fn log_insert(&self, txn_id: TxnId, table_name: &str, row_key: RowKey) {
        self.add_record(txn_id, table_name, row_key, UndoAction::Insert);
    }

    /// Log a column update with the values it overwrote
    pub fn log_update(
        &self,
        txn_id: TxnId,
        table_name: &str,
        row_key: RowKey,
        old_values: Vec<(usize, Datum)>,
    ) {
        self.add_record(txn_id, table_name, row_key, UndoAction::Update { old_values });
    }

    /// Log a delete with the removed row
    pub fn log_delete(
        &self,
        txn_id: TxnId,
        table_name: &str,
        row_key: RowKey,
        partition: PartitionKey,
        row: Row,
    ) {
        self.add_record(
            txn_id,
            table_name,
            row_key,
            UndoAction::Delete { partition, row },
        );
    }

    fn add_record(&self, txn_id: TxnId, table_name: &str, row_key: RowKey, action: UndoAction) {
        let record = UndoRecord {
            txn_id,
            table_name: table_name.to_string(),
            row_key,
            action,
        };
        self.records.write().entry(txn_id).or_default().push(record);
    }

    /// Remove a transaction's records, newest first, for rollback
    pub fn take_reversed(&self, txn_id: TxnId) -> Vec<UndoRecord> {
        let mut records = self.records.write().remove(&txn_id).unwrap_or_default();
        records.reverse();
        records
    }

    /// Drop a committed transaction's records
    pub fn discard(&self, txn_id: TxnId) -> usize {
        self.records
            .write()
            .remove(&txn_id)
            .map_or(0, |records| records.len())
    }

    /// Number of records held for a transaction
    pub fn record_count(&self, txn_id: TxnId) -> usize {
        self.records.read().get(&txn_id).map_or(0, Vec::len)
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}
