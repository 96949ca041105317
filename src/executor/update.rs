//! UPDATE statement description
//!
//! An update assigns new values to columns of the rows matching a filter.
//! Assignments to ordinary columns are value updates: they take column locks
//! and are applied in place, so two transactions may update disjoint columns
//! of the same row concurrently. Assigning a key column moves the row to a
//! new key; that is a structural change and needs the row lock.

use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};
use super::row::{Row, RowKey};
use super::select::{Filter, Operand};

/// A resolved UPDATE
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub table: String,
    pub filter: Filter,
    /// (column, new value)
    pub assignments: Vec<(usize, Operand)>,
    /// Columns the row key is built from
    pub key_columns: Vec<usize>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Update {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_assignment(mut self, column: usize, value: impl Into<Operand>) -> Self {
        self.assignments.push((column, value.into()));
        self
    }

    pub fn with_key_columns(mut self, columns: Vec<usize>) -> Self {
        self.key_columns = columns;
        self
    }

    /// Whether any assignment changes the row key
    pub fn is_structural(&self) -> bool {
        self.assignments
            .iter()
            .any(|(column, _)| self.key_columns.contains(column))
    }

    /// Columns written, in assignment order, without repeats
    pub fn assigned_columns(&self) -> Vec<usize> {
        let mut columns: Vec<usize> = Vec::with_capacity(self.assignments.len());
        for (column, _) in &self.assignments {
            if !columns.contains(column) {
                columns.push(*column);
            }
        }
        columns
    }

    /// Evaluate assignment values against the bind parameters
    ///
    /// A column assigned twice keeps the last value.
    pub fn resolve_assignments(&self, params: &[Datum]) -> ExecutorResult<Vec<(usize, Datum)>> {
        let mut resolved: Vec<(usize, Datum)> = Vec::with_capacity(self.assignments.len());
        for (column, operand) in &self.assignments {
            let value = operand.resolve(params)?;
            match resolved.iter_mut().find(|(c, _)| c == column) {
                Some(slot) => slot.1 = value,
                None => resolved.push((*column, value)),
            }
        }
        Ok(resolved)
    }

    /// Key of `row` under this table's key columns
    pub fn key_of(&self, row: &Row) -> ExecutorResult<RowKey> {
        let mut values = Vec::with_capacity(self.key_columns.len());
        for &column in &self.key_columns {
            values.push(row.get(column)?.clone());
        }
        encode_key(&values)
    }
}

/// Copy of `row` with `assignments` applied
pub fn apply_assignments(row: &Row, assignments: &[(usize, Datum)]) -> ExecutorResult<Row> {
    let mut updated = row.clone();
    for (column, value) in assignments {
        updated.replace(*column, value.clone())?;
    }
    Ok(updated)
}

/// Build a row key from key column values
///
/// A single integer or string column encodes the same way as
/// `RowKey::from`; composite keys concatenate the parts, strings
/// NUL-terminated.
pub fn encode_key(values: &[Datum]) -> ExecutorResult<RowKey> {
    match values {
        [] => Err(ExecutorError::InvalidStatement(
            "table has no key columns".to_string(),
        )),
        [Datum::Int(v)] => Ok(RowKey::from(*v)),
        [Datum::String(s)] => Ok(RowKey::from(s.as_str())),
        parts => {
            let mut bytes = Vec::new();
            for part in parts {
                match part {
                    Datum::Int(v) => bytes.extend_from_slice(RowKey::from(*v).as_bytes()),
                    Datum::String(s) => {
                        bytes.extend_from_slice(s.as_bytes());
                        bytes.push(0);
                    }
                    other => {
                        return Err(ExecutorError::TypeMismatch {
                            expected: "integer or string",
                            context: format!("row key value {}", other),
                        })
                    }
                }
            }
            Ok(RowKey(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_detection() {
        let update = Update::new("t")
            .with_key_columns(vec![0])
            .with_assignment(2, 5);
        assert!(!update.is_structural());
        assert!(update.clone().with_assignment(0, 9).is_structural());
    }

    #[test]
    fn test_resolve_last_assignment_wins() {
        let update = Update::new("t")
            .with_assignment(1, Operand::Parameter(0))
            .with_assignment(2, 7)
            .with_assignment(1, 8);
        assert_eq!(update.assigned_columns(), vec![1, 2]);
        assert_eq!(
            update.resolve_assignments(&[Datum::Int(3)]).unwrap(),
            vec![(1, Datum::Int(8)), (2, Datum::Int(7))]
        );
        assert!(Update::new("t")
            .with_assignment(1, Operand::Parameter(4))
            .resolve_assignments(&[])
            .is_err());
    }

    #[test]
    fn test_key_encoding() {
        let update = Update::new("t").with_key_columns(vec![0]);
        let row = Row::new(vec![Datum::Int(42), Datum::from("x")]);
        assert_eq!(update.key_of(&row).unwrap(), RowKey::from(42));

        let composite = encode_key(&[Datum::from("a"), Datum::Int(1)]).unwrap();
        assert_eq!(composite.as_bytes()[..2], [b'a', 0]);
        assert!(encode_key(&[Datum::Float(1.0)]).is_err());
        assert!(encode_key(&[]).is_err());
    }

    #[test]
    fn test_apply_assignments() {
        let row = Row::new(vec![Datum::Int(1), Datum::Int(2)]);
        let updated = apply_assignments(&row, &[(1, Datum::Int(20))]).unwrap();
        assert_eq!(updated.values(), &[Datum::Int(1), Datum::Int(20)]);
        assert!(apply_assignments(&row, &[(5, Datum::Null)]).is_err());
    }
}
