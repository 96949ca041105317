//! Distinct operator
//!
//! Implements SELECT DISTINCT using a hash set of output rows.

use std::collections::HashSet;

use super::error::ExecutorResult;
use super::operator::OperatorState;
use super::row::Row;
use super::{shape, QueryOperator};

/// Hash-based distinct scan
///
/// Only the first occurrence of each output row is accepted, so the limit
/// counts distinct rows.
#[derive(Debug, Default)]
pub struct DistinctScan {
    projection: Option<Vec<usize>>,
    /// Seen rows (for deduplication)
    seen: HashSet<Row>,
}

impl DistinctScan {
    pub fn new(projection: Option<Vec<usize>>) -> Self {
        DistinctScan {
            projection,
            seen: HashSet::new(),
        }
    }
}

impl QueryOperator for DistinctScan {
    fn scan_ordered(&self) -> bool {
        true
    }

    fn accept(&mut self, row: Row, state: &mut OperatorState) -> ExecutorResult<bool> {
        let row = shape(row, self.projection.as_deref())?;
        if !self.seen.insert(row.clone()) {
            return Ok(false);
        }
        state.add_row(row)?;
        Ok(true)
    }

    fn finish(&mut self, _state: &mut OperatorState) -> ExecutorResult<()> {
        self.seen.clear();
        Ok(())
    }
}
