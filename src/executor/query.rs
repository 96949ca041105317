//! Resumable SELECT execution
//!
//! `SelectRun` owns everything one query execution needs between scheduler
//! turns: the candidate rows, the scan cursor, the operator variant and its
//! counters. Nothing is borrowed across a suspension, so a suspended run can
//! move to another worker thread.

use std::sync::Arc;

use super::aggregate::GroupedScan;
use super::datum::Datum;
use super::distinct::DistinctScan;
use super::error::{ExecutorError, ExecutorResult};
use super::operator::OperatorState;
use super::result::{QueryResult, ResultTarget};
use super::scan::FlatScan;
use super::select::Select;
use super::sort::SortedScan;
use super::{QueryOperator, RunStatus, ScanCursor, YieldCheckpoint};
use crate::storage::KeyedRow;

/// Lifecycle of a query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Created,
    Started,
    Running,
    Stopped,
}

/// Pick the operator variant for a select
pub fn operator_for(select: &Select) -> Box<dyn QueryOperator> {
    if let Some(group_by) = &select.group_by {
        return Box::new(GroupedScan::new(
            group_by.keys.clone(),
            group_by.aggregates.clone(),
            select.order_by.clone(),
        ));
    }
    if select.needs_sort() {
        return Box::new(SortedScan::new(
            select.projection.clone(),
            select.order_by.clone(),
            select.distinct,
        ));
    }
    if select.distinct {
        return Box::new(DistinctScan::new(select.projection.clone()));
    }
    Box::new(FlatScan::new(select.projection.clone()))
}

/// One execution of a select
pub struct SelectRun {
    select: Arc<Select>,
    params: Vec<Datum>,
    operator: Box<dyn QueryOperator>,
    state: OperatorState,
    rows: Vec<KeyedRow>,
    cursor: ScanCursor,
    phase: QueryPhase,
    target: Option<Box<dyn ResultTarget>>,
}

impl SelectRun {
    /// Create an execution returning at most `max_rows` rows (`<= 0`: all)
    pub fn new(select: Arc<Select>, params: Vec<Datum>, max_rows: i32) -> Self {
        let operator = operator_for(&select);
        SelectRun {
            select,
            params,
            operator,
            state: OperatorState::new(max_rows),
            rows: Vec::new(),
            cursor: ScanCursor::default(),
            phase: QueryPhase::Created,
            target: None,
        }
    }

    /// Deliver rows to `target` on stop instead of returning them
    pub fn with_target(mut self, target: Box<dyn ResultTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// Fix limits and sampling, and take the candidate rows in scan order
    pub fn start(&mut self, rows: Vec<KeyedRow>) -> ExecutorResult<()> {
        if self.phase != QueryPhase::Created {
            return Err(ExecutorError::Internal(format!(
                "select started in phase {:?}",
                self.phase
            )));
        }
        let offset = self.select.offset_value(&self.params)?;
        let sample_size = self.select.sample_size_value(&self.params)?;
        let column_count = self.select.output_width().unwrap_or(0);
        self.state.start(
            column_count,
            offset,
            sample_size,
            self.operator.scan_ordered(),
        );
        self.rows = rows;
        self.cursor = ScanCursor::default();
        self.phase = QueryPhase::Started;
        Ok(())
    }

    /// Examine rows until the scan ends or `checkpoint` asks to yield
    ///
    /// On error the result buffer is released and the run is stopped.
    pub fn run(&mut self, checkpoint: &mut dyn YieldCheckpoint) -> ExecutorResult<RunStatus> {
        match self.phase {
            QueryPhase::Started | QueryPhase::Running => {}
            phase => {
                return Err(ExecutorError::Internal(format!(
                    "select run in phase {:?}",
                    phase
                )))
            }
        }
        self.phase = QueryPhase::Running;

        let status = self.scan(checkpoint);
        if status.is_err() {
            self.abort();
        }
        status
    }

    fn scan(&mut self, checkpoint: &mut dyn YieldCheckpoint) -> ExecutorResult<RunStatus> {
        while !self.state.loop_end && self.cursor.position < self.rows.len() {
            let row = &self.rows[self.cursor.position].1;
            self.cursor.position += 1;
            self.state.loop_count += 1;

            if self.select.filter.matches(row, &self.params)?
                && self.operator.accept(row.clone(), &mut self.state)?
            {
                self.state.row_count += 1;
            }

            if self.state.can_break_loop() {
                self.state.loop_end = true;
                break;
            }
            if checkpoint.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            if checkpoint.yield_if_needed(self.state.loop_count) {
                return Ok(RunStatus::Suspended(self.cursor));
            }
        }

        self.state.loop_end = true;
        self.operator.finish(&mut self.state)?;
        Ok(RunStatus::Finished)
    }

    /// Apply the caller's offset and limit and deliver the result
    pub fn stop(&mut self) -> ExecutorResult<QueryResult> {
        if self.phase != QueryPhase::Running || !self.state.loop_end {
            return Err(ExecutorError::Internal(format!(
                "select stopped before its scan finished (phase {:?})",
                self.phase
            )));
        }
        self.phase = QueryPhase::Stopped;
        self.rows = Vec::new();
        let result = self.state.stop(self.target.as_mut());
        if result.is_err() {
            self.state.release();
        }
        result
    }

    /// Stop without delivering anything
    pub fn abort(&mut self) {
        self.state.release();
        self.rows = Vec::new();
        self.phase = QueryPhase::Stopped;
    }

    /// Run to completion with `checkpoint`, resuming after each suspension
    pub fn execute(
        &mut self,
        rows: Vec<KeyedRow>,
        checkpoint: &mut dyn YieldCheckpoint,
    ) -> ExecutorResult<QueryResult> {
        self.start(rows)?;
        while let RunStatus::Suspended(_) = self.run(checkpoint)? {}
        self.stop()
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn state(&self) -> &OperatorState {
        &self.state
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    pub fn select(&self) -> &Arc<Select> {
        &self.select
    }
}
