//! Sorted scan operator
//!
//! Implements ORDER BY without a usable index. Only the best `limit_rows`
//! rows are retained during the scan (a bounded max-heap), which is enough
//! because `limit_rows` already includes the offset.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use super::datum::Datum;
use super::error::ExecutorResult;
use super::operator::OperatorState;
use super::row::Row;
use super::{shape, QueryOperator};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term, by output column position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: usize,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        SortKey {
            column,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(column: usize) -> Self {
        SortKey {
            column,
            order: SortOrder::Desc,
        }
    }
}

/// Compare two rows' extracted key values under `keys`
pub(crate) fn compare_keys(a: &[Datum], b: &[Datum], keys: &[SortKey]) -> Ordering {
    for (i, (left, right)) in a.iter().zip(b.iter()).enumerate() {
        let cmp = left.cmp(right);
        let cmp = match keys.get(i).map(|k| k.order) {
            Some(SortOrder::Desc) => cmp.reverse(),
            _ => cmp,
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

pub(crate) fn extract_keys(row: &Row, keys: &[SortKey]) -> ExecutorResult<Vec<Datum>> {
    keys.iter().map(|k| row.get(k.column).cloned()).collect()
}

/// A retained row; greater means later in the final order
#[derive(Debug)]
struct Candidate {
    values: Vec<Datum>,
    /// Scan position, so equal keys keep scan order
    seq: u64,
    row: Row,
    keys: Arc<[SortKey]>,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.values, &other.values, &self.keys).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Top-N sort scan
#[derive(Debug)]
pub struct SortedScan {
    projection: Option<Vec<usize>>,
    keys: Arc<[SortKey]>,
    /// Present for SELECT DISTINCT ... ORDER BY
    seen: Option<HashSet<Row>>,
    heap: BinaryHeap<Candidate>,
    next_seq: u64,
}

impl SortedScan {
    pub fn new(projection: Option<Vec<usize>>, keys: Vec<SortKey>, distinct: bool) -> Self {
        SortedScan {
            projection,
            keys: keys.into(),
            seen: distinct.then(HashSet::new),
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Rows currently retained
    pub fn retained(&self) -> usize {
        self.heap.len()
    }
}

impl QueryOperator for SortedScan {
    fn scan_ordered(&self) -> bool {
        false
    }

    fn accept(&mut self, row: Row, state: &mut OperatorState) -> ExecutorResult<bool> {
        let row = shape(row, self.projection.as_deref())?;
        if let Some(seen) = &mut self.seen {
            if !seen.insert(row.clone()) {
                return Ok(false);
            }
        }

        let candidate = Candidate {
            values: extract_keys(&row, &self.keys)?,
            seq: self.next_seq,
            row,
            keys: self.keys.clone(),
        };
        self.next_seq += 1;

        let capacity = if state.limit_rows > 0 {
            usize::try_from(state.limit_rows).unwrap_or(usize::MAX)
        } else {
            usize::MAX
        };
        if self.heap.len() < capacity {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
        Ok(true)
    }

    fn finish(&mut self, state: &mut OperatorState) -> ExecutorResult<()> {
        let heap = std::mem::take(&mut self.heap);
        for candidate in heap.into_sorted_vec() {
            state.add_row(candidate.row)?;
        }
        self.seen = self.seen.take().map(|_| HashSet::new());
        Ok(())
    }
}
