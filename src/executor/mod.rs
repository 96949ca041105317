//! Query and update execution
//!
//! A query runs as a resumable operator: `start()` fixes the limits, `run()`
//! examines rows in scan order and may suspend at any row boundary when the
//! scheduler asks it to yield, and `stop()` applies the caller's offset and
//! limit to the finished result. Operator variants (plain, distinct, grouped,
//! sorted) only decide what happens to each accepted row; the loop, counters
//! and result buffer are shared.

pub mod aggregate;
pub mod datum;
pub mod distinct;
pub mod error;
pub mod operator;
pub mod query;
pub mod result;
pub mod row;
pub mod scan;
pub mod select;
pub mod sort;
pub mod update;

pub use aggregate::{Aggregate, AggregateFunction, GroupedScan};
pub use datum::Datum;
pub use distinct::DistinctScan;
pub use error::{ExecutorError, ExecutorResult};
pub use operator::OperatorState;
pub use query::{QueryPhase, SelectRun};
pub use result::{LocalResult, QueryResult, ResultTarget};
pub use row::{Row, RowKey};
pub use scan::FlatScan;
pub use select::{CompareOp, Filter, Operand, Predicate, Select};
pub use sort::{SortKey, SortOrder, SortedScan};
pub use update::Update;

/// Variant-specific part of a query operator
///
/// The shared scan loop filters each examined row and hands matching rows to
/// `accept`; every `true` return counts toward `row_count`.
pub trait QueryOperator: Send {
    /// Whether accepted rows are final in scan order, so reaching the limit
    /// can end the scan early
    fn scan_ordered(&self) -> bool;

    /// Take one matching row
    fn accept(&mut self, row: Row, state: &mut OperatorState) -> ExecutorResult<bool>;

    /// Emit retained rows into the result once the scan ends
    fn finish(&mut self, _state: &mut OperatorState) -> ExecutorResult<()> {
        Ok(())
    }
}

/// Scheduler hook called after every examined row
pub trait YieldCheckpoint {
    /// Whether to suspend now; `row` is the number of rows examined so far
    fn yield_if_needed(&mut self, row: i64) -> bool;

    /// Whether the statement was cancelled
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Checkpoint for running an operator to completion
#[derive(Debug, Default, Clone, Copy)]
pub struct RunToCompletion;

impl YieldCheckpoint for RunToCompletion {
    fn yield_if_needed(&mut self, _row: i64) -> bool {
        false
    }
}

/// Position of the next unexamined row
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    pub position: usize,
}

/// Outcome of one `run()` slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Suspended at a yield checkpoint; the next `run()` resumes at the cursor
    Suspended(ScanCursor),
    /// The scan is over and the operator can be stopped
    Finished,
}

/// Project a row if a projection is given
pub(crate) fn shape(row: Row, projection: Option<&[usize]>) -> ExecutorResult<Row> {
    match projection {
        Some(columns) => row.project(columns),
        None => Ok(row),
    }
}
