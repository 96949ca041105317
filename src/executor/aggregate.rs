//! Grouped scan operator
//!
//! Implements GROUP BY with aggregate functions (COUNT, SUM, AVG, MIN, MAX).
//! Every matching row is folded into its group during the scan; groups become
//! result rows when the scan ends. SAMPLE_SIZE bounds how many input rows are
//! folded, while the limit only applies to the emitted groups.

use std::collections::HashMap;

use super::datum::Datum;
use super::error::ExecutorResult;
use super::operator::OperatorState;
use super::row::Row;
use super::sort::{compare_keys, extract_keys, SortKey};
use super::QueryOperator;

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Aggregate over one input column; COUNT without a column is COUNT(*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub column: Option<usize>,
}

impl Aggregate {
    pub fn count_star() -> Self {
        Aggregate {
            function: AggregateFunction::Count,
            column: None,
        }
    }

    pub fn count(column: usize) -> Self {
        Self::over(AggregateFunction::Count, column)
    }

    pub fn sum(column: usize) -> Self {
        Self::over(AggregateFunction::Sum, column)
    }

    pub fn avg(column: usize) -> Self {
        Self::over(AggregateFunction::Avg, column)
    }

    pub fn min(column: usize) -> Self {
        Self::over(AggregateFunction::Min, column)
    }

    pub fn max(column: usize) -> Self {
        Self::over(AggregateFunction::Max, column)
    }

    fn over(function: AggregateFunction, column: usize) -> Self {
        Aggregate {
            function,
            column: Some(column),
        }
    }
}

/// Accumulator for a single aggregate function
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    /// Integer sum until it overflows or meets a float
    SumInt(Option<i64>),
    SumFloat(f64),
    Avg { sum: f64, count: i64 },
    Min(Option<Datum>),
    Max(Option<Datum>),
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::SumInt(None),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    fn accumulate(&mut self, value: &Datum) {
        if value.is_null() {
            return;
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::SumInt(sum) => {
                let base = sum.unwrap_or(0);
                match value {
                    Datum::Int(v) => match base.checked_add(*v) {
                        Some(total) => *sum = Some(total),
                        None => *self = Accumulator::SumFloat(base as f64 + *v as f64),
                    },
                    other => {
                        if let Some(v) = other.as_float() {
                            *self = Accumulator::SumFloat(base as f64 + v);
                        }
                    }
                }
            }
            Accumulator::SumFloat(sum) => {
                if let Some(v) = value.as_float() {
                    *sum += v;
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = value.as_float() {
                    *sum += v;
                    *count += 1;
                }
            }
            Accumulator::Min(min) => match min {
                Some(m) if *value >= *m => {}
                _ => *min = Some(value.clone()),
            },
            Accumulator::Max(max) => match max {
                Some(m) if *value <= *m => {}
                _ => *max = Some(value.clone()),
            },
        }
    }

    fn finalize(&self) -> Datum {
        match self {
            Accumulator::Count(n) => Datum::Int(*n),
            Accumulator::SumInt(sum) => sum.map_or(Datum::Null, Datum::Int),
            Accumulator::SumFloat(sum) => Datum::Float(*sum),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    Datum::Null
                } else {
                    Datum::Float(*sum / *count as f64)
                }
            }
            Accumulator::Min(min) => min.clone().unwrap_or(Datum::Null),
            Accumulator::Max(max) => max.clone().unwrap_or(Datum::Null),
        }
    }
}

/// Hash GROUP BY scan
///
/// Output rows are the group key columns followed by the aggregates, in the
/// order groups were first seen unless `order_by` sorts them.
#[derive(Debug)]
pub struct GroupedScan {
    keys: Vec<usize>,
    aggregates: Vec<Aggregate>,
    order_by: Vec<SortKey>,
    groups: HashMap<Vec<Datum>, Vec<Accumulator>>,
    /// Group keys in first-seen order
    first_seen: Vec<Vec<Datum>>,
}

impl GroupedScan {
    pub fn new(keys: Vec<usize>, aggregates: Vec<Aggregate>, order_by: Vec<SortKey>) -> Self {
        GroupedScan {
            keys,
            aggregates,
            order_by,
            groups: HashMap::new(),
            first_seen: Vec::new(),
        }
    }

    fn new_accumulators(&self) -> Vec<Accumulator> {
        self.aggregates
            .iter()
            .map(|agg| Accumulator::new(agg.function))
            .collect()
    }
}

impl QueryOperator for GroupedScan {
    fn scan_ordered(&self) -> bool {
        false
    }

    fn accept(&mut self, row: Row, _state: &mut OperatorState) -> ExecutorResult<bool> {
        let mut group_values = Vec::with_capacity(self.keys.len());
        for &column in &self.keys {
            group_values.push(row.get(column)?.clone());
        }

        let mut values = Vec::with_capacity(self.aggregates.len());
        for agg in &self.aggregates {
            values.push(match agg.column {
                Some(column) => row.get(column)?.clone(),
                // COUNT(*) counts every row
                None => Datum::Int(1),
            });
        }

        if !self.groups.contains_key(&group_values) {
            let accumulators = self.new_accumulators();
            self.first_seen.push(group_values.clone());
            self.groups.insert(group_values.clone(), accumulators);
        }
        if let Some(accumulators) = self.groups.get_mut(&group_values) {
            for (acc, value) in accumulators.iter_mut().zip(values.iter()) {
                acc.accumulate(value);
            }
        }
        Ok(true)
    }

    fn finish(&mut self, state: &mut OperatorState) -> ExecutorResult<()> {
        let mut output = Vec::with_capacity(self.first_seen.len());
        for key in self.first_seen.drain(..) {
            if let Some(accumulators) = self.groups.remove(&key) {
                let mut values = key;
                values.extend(accumulators.iter().map(Accumulator::finalize));
                output.push(Row::new(values));
            }
        }

        // Aggregates without GROUP BY over empty input still produce one row
        if output.is_empty() && self.keys.is_empty() && !self.aggregates.is_empty() {
            let values = self
                .new_accumulators()
                .iter()
                .map(Accumulator::finalize)
                .collect();
            output.push(Row::new(values));
        }

        if !self.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(output.len());
            for row in output {
                keyed.push((extract_keys(&row, &self.order_by)?, row));
            }
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &self.order_by));
            output = keyed.into_iter().map(|(_, row)| row).collect();
        }

        for row in output {
            state.add_row(row)?;
        }
        Ok(())
    }
}
