//! Lock keys

use std::fmt;

use crate::executor::RowKey;

/// Column position within a row
pub type ColumnId = usize;

/// Identifies one row of one table in the lock table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowLockKey {
    pub table: String,
    pub row: RowKey,
}

impl RowLockKey {
    pub fn new(table: impl Into<String>, row: RowKey) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }

    pub(crate) fn describe(&self, scope: LockScope) -> String {
        match scope {
            LockScope::Row => format!("Row({}:{})", self.table, self.row),
            LockScope::Column(c) => format!("Column({}:{}:{})", self.table, self.row, c),
        }
    }
}

impl fmt::Display for RowLockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.row)
    }
}

/// Granularity of a lock request on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Whole-row lock for structural changes
    Row,
    /// Single-column lock for value changes
    Column(ColumnId),
}

impl LockScope {
    /// Whether two requests on the same row exclude each other when made by
    /// different transactions
    pub fn conflicts_with(self, other: LockScope) -> bool {
        match (self, other) {
            (LockScope::Row, _) | (_, LockScope::Row) => true,
            (LockScope::Column(a), LockScope::Column(b)) => a == b,
        }
    }
}
