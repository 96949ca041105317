//! Resolved SELECT description
//!
//! A `Select` arrives already planned: column references are row positions,
//! and the planner has decided whether an index delivers rows in sort order.

use std::cmp::Ordering;

use super::aggregate::Aggregate;
use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};
use super::row::Row;
use super::sort::SortKey;

/// A value in a statement: a literal or a bind parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Datum),
    /// Zero-based bind parameter index
    Parameter(usize),
}

impl Operand {
    /// Resolve against the statement's bind parameters
    pub fn resolve(&self, params: &[Datum]) -> ExecutorResult<Datum> {
        match self {
            Operand::Literal(d) => Ok(d.clone()),
            Operand::Parameter(index) => {
                params
                    .get(*index)
                    .cloned()
                    .ok_or(ExecutorError::InvalidParameter {
                        index: *index,
                        count: params.len(),
                    })
            }
        }
    }

    /// Resolve to an integer; NULL resolves to `None`
    pub fn resolve_int(&self, params: &[Datum], context: &str) -> ExecutorResult<Option<i64>> {
        let value = self.resolve(params)?;
        if value.is_null() {
            return Ok(None);
        }
        value.as_int().map(Some).ok_or_else(|| ExecutorError::TypeMismatch {
            expected: "integer",
            context: context.to_string(),
        })
    }
}

impl From<Datum> for Operand {
    fn from(d: Datum) -> Self {
        Operand::Literal(d)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Literal(Datum::Int(v))
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// `column <op> operand`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: usize,
    pub op: CompareOp,
    pub value: Operand,
}

impl Predicate {
    pub fn new(column: usize, op: CompareOp, value: impl Into<Operand>) -> Self {
        Self {
            column,
            op,
            value: value.into(),
        }
    }

    /// Evaluate against a row; comparisons with NULL are false
    pub fn matches(&self, row: &Row, params: &[Datum]) -> ExecutorResult<bool> {
        let left = row.get(self.column)?;
        let right = self.value.resolve(params)?;
        if left.is_null() || right.is_null() {
            return Ok(false);
        }
        let ord = left.cmp(&right);
        Ok(match self.op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        })
    }
}

/// Conjunction of predicates; empty matches every row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    pub fn matches(&self, row: &Row, params: &[Datum]) -> ExecutorResult<bool> {
        for predicate in &self.predicates {
            if !predicate.matches(row, params)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// GROUP BY clause
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    /// Grouping columns of the input row
    pub keys: Vec<usize>,
    pub aggregates: Vec<Aggregate>,
}

/// A resolved SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub filter: Filter,
    /// Output columns; `None` keeps every column
    pub projection: Option<Vec<usize>>,
    pub distinct: bool,
    pub group_by: Option<GroupBy>,
    /// Sort keys, as positions in the output row
    pub order_by: Vec<SortKey>,
    /// Rows already arrive in `order_by` order
    pub sort_using_index: bool,
    pub offset: Option<Operand>,
    /// SAMPLE_SIZE: stop after this many accepted rows
    pub sample_size: Option<Operand>,
}

impl Select {
    /// `SELECT * FROM table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::default(),
            projection: None,
            distinct: false,
            group_by: None,
            order_by: Vec::new(),
            sort_using_index: false,
            offset: None,
            sample_size: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, columns: Vec<usize>) -> Self {
        self.projection = Some(columns);
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_group_by(mut self, keys: Vec<usize>, aggregates: Vec<Aggregate>) -> Self {
        self.group_by = Some(GroupBy { keys, aggregates });
        self
    }

    pub fn with_order_by(mut self, keys: Vec<SortKey>) -> Self {
        self.order_by = keys;
        self
    }

    /// Mark the sort as satisfied by scan order
    pub fn with_sort_using_index(mut self) -> Self {
        self.sort_using_index = true;
        self
    }

    pub fn with_offset(mut self, offset: impl Into<Operand>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn with_sample_size(mut self, size: impl Into<Operand>) -> Self {
        self.sample_size = Some(size.into());
        self
    }

    /// Whether a sort must happen after the scan
    pub fn needs_sort(&self) -> bool {
        !self.order_by.is_empty() && !self.sort_using_index
    }

    /// Evaluate OFFSET; absent, NULL and negative offsets are 0
    pub fn offset_value(&self, params: &[Datum]) -> ExecutorResult<i64> {
        match &self.offset {
            Some(operand) => Ok(operand.resolve_int(params, "OFFSET")?.unwrap_or(0).max(0)),
            None => Ok(0),
        }
    }

    /// Evaluate SAMPLE_SIZE; absent or non-positive disables sampling
    pub fn sample_size_value(&self, params: &[Datum]) -> ExecutorResult<i64> {
        match &self.sample_size {
            Some(operand) => Ok(operand
                .resolve_int(params, "SAMPLE_SIZE")?
                .unwrap_or(0)
                .max(0)),
            None => Ok(0),
        }
    }

    /// Number of output columns, when known without seeing a row
    pub fn output_width(&self) -> Option<usize> {
        if let Some(group_by) = &self.group_by {
            return Some(group_by.keys.len() + group_by.aggregates.len());
        }
        self.projection.as_ref().map(Vec::len)
    }
}
