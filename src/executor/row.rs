//! Row and row-key types

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};

/// Primary key of a stored row, as raw bytes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub Vec<u8>);

impl RowKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.as_bytes().to_vec())
    }
}

impl From<i64> for RowKey {
    fn from(v: i64) -> Self {
        // Big-endian with the sign bit flipped keeps byte order == numeric order
        RowKey(((v as u64) ^ (1 << 63)).to_be_bytes().to_vec())
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{}", s),
            _ => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// A row of datums
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Datum>,
}

impl Row {
    /// Create a new row with the given values
    pub fn new(values: Vec<Datum>) -> Self {
        Row { values }
    }

    /// Number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a datum by index
    pub fn get(&self, index: usize) -> ExecutorResult<&Datum> {
        self.values
            .get(index)
            .ok_or(ExecutorError::ColumnIndexOutOfBounds {
                index,
                row_len: self.values.len(),
            })
    }

    /// Replace the datum at `index`, returning the previous value
    pub fn replace(&mut self, index: usize, value: Datum) -> ExecutorResult<Datum> {
        let row_len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ExecutorError::ColumnIndexOutOfBounds { index, row_len })?;
        Ok(std::mem::replace(slot, value))
    }

    /// All values as a slice
    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// Take ownership of values
    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }

    /// Project specific columns by indices
    pub fn project(&self, indices: &[usize]) -> ExecutorResult<Row> {
        let mut values = Vec::with_capacity(indices.len());
        for &idx in indices {
            values.push(self.get(idx)?.clone());
        }
        Ok(Row { values })
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Row {}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for datum in &self.values {
            datum.hash(state);
        }
    }
}

impl From<Vec<Datum>> for Row {
    fn from(values: Vec<Datum>) -> Self {
        Row { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_replace() {
        let mut row = Row::new(vec![Datum::Int(1), Datum::from("a")]);
        let old = row.replace(1, Datum::from("b")).unwrap();
        assert_eq!(old, Datum::from("a"));
        assert_eq!(row.get(1).unwrap(), &Datum::from("b"));
        assert!(row.replace(5, Datum::Null).is_err());
    }

    #[test]
    fn test_row_project() {
        let row = Row::new(vec![Datum::Int(1), Datum::Int(2), Datum::Int(3)]);
        let projected = row.project(&[0, 2]).unwrap();
        assert_eq!(projected.values(), &[Datum::Int(1), Datum::Int(3)]);
    }

    #[test]
    fn test_int_row_key_order() {
        assert!(RowKey::from(-5) < RowKey::from(3));
        assert!(RowKey::from(3) < RowKey::from(300));
    }

    #[test]
    fn test_row_key_display() {
        assert_eq!(RowKey::from("02").to_string(), "02");
    }
}
