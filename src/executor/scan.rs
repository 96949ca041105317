//! Plain scan operator

use super::error::ExecutorResult;
use super::operator::OperatorState;
use super::row::Row;
use super::{shape, QueryOperator};

/// Adds every matching row to the result in scan order
#[derive(Debug, Default)]
pub struct FlatScan {
    projection: Option<Vec<usize>>,
}

impl FlatScan {
    pub fn new(projection: Option<Vec<usize>>) -> Self {
        FlatScan { projection }
    }
}

impl QueryOperator for FlatScan {
    fn scan_ordered(&self) -> bool {
        true
    }

    fn accept(&mut self, row: Row, state: &mut OperatorState) -> ExecutorResult<bool> {
        state.add_row(shape(row, self.projection.as_deref())?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Datum;

    #[test]
    fn test_flat_scan_projects() {
        let mut state = OperatorState::new(0);
        state.start(1, 0, 0, true);
        let mut scan = FlatScan::new(Some(vec![1]));
        assert!(scan
            .accept(Row::new(vec![Datum::Int(1), Datum::Int(2)]), &mut state)
            .unwrap());
        let result = state.stop(None).unwrap();
        assert_eq!(result.rows, vec![Row::new(vec![Datum::Int(2)])]);
    }
}
