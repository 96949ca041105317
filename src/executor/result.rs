//! Query result buffer and external result sinks

use std::collections::VecDeque;

use super::error::{ExecutorError, ExecutorResult};
use super::row::Row;

/// Destination for finished query rows
pub trait ResultTarget: Send {
    /// Append one row
    fn add_row(&mut self, row: Row) -> ExecutorResult<()>;

    /// Rows received so far
    fn row_count(&self) -> usize;
}

impl ResultTarget for Vec<Row> {
    fn add_row(&mut self, row: Row) -> ExecutorResult<()> {
        self.push(row);
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

/// Final outcome of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub column_count: usize,
    /// Rows, unless they were drained into a [`ResultTarget`]
    pub rows: Vec<Row>,
    /// Rows delivered, to `rows` or to the target
    pub row_count: usize,
}

/// Rows accumulated by one query execution
///
/// Rows are added during the scan. `done()` then applies the caller-visible
/// window (offset, limit) once, after which rows are read with `next()`.
#[derive(Debug, Default)]
pub struct LocalResult {
    column_count: usize,
    rows: VecDeque<Row>,
    offset: i64,
    /// `<= 0` means unlimited
    limit: i64,
    done: bool,
    closed: bool,
    current: Option<Row>,
}

impl LocalResult {
    pub fn new(column_count: usize) -> Self {
        Self {
            column_count,
            ..Self::default()
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Append a row during the scan
    pub fn add_row(&mut self, row: Row) -> ExecutorResult<()> {
        if self.done || self.closed {
            return Err(ExecutorError::Internal(
                "row added to a finished result".to_string(),
            ));
        }
        if self.column_count == 0 {
            self.column_count = row.len();
        }
        self.rows.push_back(row);
        Ok(())
    }

    /// Rows currently held
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows to skip when finished; negative counts as 0
    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset.max(0);
    }

    /// Rows to keep when finished; `<= 0` keeps all
    pub fn set_limit(&mut self, limit: i64) {
        self.limit = limit;
    }

    /// Finish the scan: apply offset then limit
    pub fn done(&mut self) {
        if self.done {
            return;
        }
        let skip = usize::try_from(self.offset).unwrap_or(usize::MAX);
        if skip >= self.rows.len() {
            self.rows.clear();
        } else {
            self.rows.drain(..skip);
        }
        if self.limit > 0 {
            let keep = usize::try_from(self.limit).unwrap_or(usize::MAX);
            self.rows.truncate(keep);
        }
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advance to the next row; false when exhausted
    pub fn next(&mut self) -> bool {
        self.current = self.rows.pop_front();
        self.current.is_some()
    }

    /// Row positioned by the last `next()`
    pub fn current_row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Take the row positioned by the last `next()`
    pub fn take_current(&mut self) -> Option<Row> {
        self.current.take()
    }

    /// Remaining rows in order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows.into()
    }

    /// Release the rows
    pub fn close(&mut self) {
        self.rows.clear();
        self.current = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
