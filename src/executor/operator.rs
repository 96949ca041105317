//! Counters and result buffer shared by every query operator variant

use super::error::{ExecutorError, ExecutorResult};
use super::result::{LocalResult, QueryResult, ResultTarget};
use super::row::Row;

/// Per-execution operator state
///
/// Two limits are tracked. `max_rows` is what the caller asked for.
/// `limit_rows` is the scan-time cap: `max_rows + offset`, because the offset
/// is relative to the final (possibly sorted) result and can only be applied
/// when the scan is over.
#[derive(Debug)]
pub struct OperatorState {
    pub column_count: usize,
    /// Caller-visible row cap; `<= 0` means unlimited
    pub max_rows: i32,
    /// Scan-time cap including the offset; never negative
    pub limit_rows: i64,
    pub sample_size: i64,
    /// Rows accepted into the result
    pub row_count: i64,
    /// Rows examined, accepted or not
    pub loop_count: i64,
    pub loop_end: bool,
    offset: i64,
    /// Accepted rows reach the result in scan order
    scan_ordered: bool,
    result: Option<LocalResult>,
}

impl OperatorState {
    pub fn new(max_rows: i32) -> Self {
        Self {
            column_count: 0,
            max_rows,
            limit_rows: 0,
            sample_size: 0,
            row_count: 0,
            loop_count: 0,
            loop_end: false,
            offset: 0,
            scan_ordered: true,
            result: None,
        }
    }

    /// Reset counters and inflate the limit by the offset
    ///
    /// `offset` and `sample_size` are already evaluated and non-negative.
    /// `scan_ordered` is false when rows must be reordered or combined after
    /// the scan (sorting without an index, grouping).
    pub fn start(&mut self, column_count: usize, offset: i64, sample_size: i64, scan_ordered: bool) {
        self.limit_rows = i64::from(self.max_rows.max(0));
        if self.limit_rows > 0 && offset > 0 {
            self.limit_rows = self.limit_rows.checked_add(offset).unwrap_or(i64::MAX);
        }
        self.column_count = column_count;
        self.offset = offset.max(0);
        self.sample_size = sample_size.max(0);
        self.scan_ordered = scan_ordered;
        self.row_count = 0;
        self.loop_count = 0;
        self.loop_end = false;
        self.result = Some(LocalResult::new(column_count));
    }

    /// Whether the scan can end before the input is exhausted
    pub fn can_break_loop(&self) -> bool {
        // Without a pending sort the first limit_rows accepted rows are final
        if self.scan_ordered && self.limit_rows > 0 && self.row_count >= self.limit_rows {
            return true;
        }
        self.sample_size > 0 && self.row_count >= self.sample_size
    }

    /// Add a row to the result buffer
    pub fn add_row(&mut self, row: Row) -> ExecutorResult<()> {
        self.result
            .as_mut()
            .ok_or_else(|| ExecutorError::Internal("operator not started".to_string()))?
            .add_row(row)
    }

    /// Rows currently buffered
    pub fn buffered_rows(&self) -> usize {
        self.result.as_ref().map_or(0, LocalResult::row_count)
    }

    /// Finalize: apply the caller's offset and limit, then drain into
    /// `target` if one is given
    pub fn stop(
        &mut self,
        target: Option<&mut Box<dyn ResultTarget>>,
    ) -> ExecutorResult<QueryResult> {
        let mut result = self
            .result
            .take()
            .ok_or_else(|| ExecutorError::Internal("operator not started".to_string()))?;
        result.set_offset(self.offset);
        if self.max_rows > 0 {
            result.set_limit(i64::from(self.max_rows));
        }
        result.done();

        let column_count = result.column_count();
        match target {
            Some(target) => {
                let mut row_count = 0;
                while result.next() {
                    if let Some(row) = result.take_current() {
                        target.add_row(row)?;
                        row_count += 1;
                    }
                }
                result.close();
                Ok(QueryResult {
                    column_count,
                    rows: Vec::new(),
                    row_count,
                })
            }
            None => {
                let rows = result.into_rows();
                Ok(QueryResult {
                    column_count,
                    row_count: rows.len(),
                    rows,
                })
            }
        }
    }

    /// Drop the result buffer without delivering it
    pub fn release(&mut self) {
        if let Some(mut result) = self.result.take() {
            result.close();
        }
    }

    pub fn is_started(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Datum;

    #[test]
    fn test_limit_inflated_by_offset() {
        let mut state = OperatorState::new(10);
        state.start(1, 5, 0, true);
        assert_eq!(state.limit_rows, 15);

        // No inflation when unlimited
        let mut state = OperatorState::new(0);
        state.start(1, 5, 0, true);
        assert_eq!(state.limit_rows, 0);

        let mut state = OperatorState::new(-1);
        state.start(1, 0, 0, true);
        assert_eq!(state.limit_rows, 0);
    }

    #[test]
    fn test_limit_inflation_clamps() {
        let mut state = OperatorState::new(i32::MAX);
        state.start(1, i64::MAX - 1, 0, true);
        assert_eq!(state.limit_rows, i64::MAX);
    }

    #[test]
    fn test_can_break_loop_truth_table() {
        // (scan_ordered, max_rows, sample_size, row_count, expected)
        let cases = [
            (true, 10, 0, 9, false),
            (true, 10, 0, 10, true),
            (false, 10, 0, 10, false),
            (false, 10, 3, 3, true),
            (true, 0, 0, 1_000, false),
            (true, 0, 5, 4, false),
            (true, 0, 5, 5, true),
        ];
        for (scan_ordered, max_rows, sample, rows, expected) in cases {
            let mut state = OperatorState::new(max_rows);
            state.start(1, 0, sample, scan_ordered);
            state.row_count = rows;
            assert_eq!(state.can_break_loop(), expected, "{:?}", (scan_ordered, max_rows, sample, rows));
        }
    }

    #[test]
    fn test_stop_applies_window_and_drains() {
        let mut state = OperatorState::new(2);
        state.start(1, 1, 0, true);
        for i in 0..3 {
            state.add_row(Row::new(vec![Datum::Int(i)])).unwrap();
        }
        let mut target: Box<dyn ResultTarget> = Box::new(Vec::<Row>::new());
        let result = state.stop(Some(&mut target)).unwrap();
        assert_eq!(result.row_count, 2);
        assert!(result.rows.is_empty());
        assert_eq!(target.row_count(), 2);
        assert!(!state.is_started());
        assert!(state.stop(None).is_err());
    }
}
