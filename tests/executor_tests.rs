//! Query operator integration tests
//!
//! Drives `SelectRun` directly over in-memory candidate rows, checking the
//! offset/limit window against a naive reference and that suspending at
//! checkpoints never changes a result.

use std::sync::Arc;

use yieldsql::executor::{
    Aggregate, CompareOp, Datum, ExecutorError, Filter, Predicate, QueryResult, Row, RowKey,
    RunStatus, RunToCompletion, Select, SelectRun, SortKey, YieldCheckpoint,
};
use yieldsql::storage::KeyedRow;

/// Rows `(id, id % 7, id % 3)` for ids `0..n`, in key order
fn table(n: i64) -> Vec<KeyedRow> {
    (0..n)
        .map(|id| {
            (
                RowKey::from(id),
                Row::new(vec![Datum::Int(id), Datum::Int(id % 7), Datum::Int(id % 3)]),
            )
        })
        .collect()
}

fn column(result: &QueryResult, index: usize) -> Vec<i64> {
    result
        .rows
        .iter()
        .map(|row| row.get(index).unwrap().as_int().unwrap())
        .collect()
}

/// Suspends every `every` rows
struct EveryN {
    every: i64,
    suspensions: usize,
}

impl YieldCheckpoint for EveryN {
    fn yield_if_needed(&mut self, row: i64) -> bool {
        let suspend = row % self.every == 0;
        if suspend {
            self.suspensions += 1;
        }
        suspend
    }
}

fn run_to_end(select: Select, max_rows: i32, rows: Vec<KeyedRow>) -> QueryResult {
    SelectRun::new(Arc::new(select), Vec::new(), max_rows)
        .execute(rows, &mut RunToCompletion)
        .unwrap()
}

fn run_suspending(select: Select, max_rows: i32, rows: Vec<KeyedRow>, every: i64) -> (QueryResult, usize) {
    let mut run = SelectRun::new(Arc::new(select), Vec::new(), max_rows);
    let mut checkpoint = EveryN {
        every,
        suspensions: 0,
    };
    run.start(rows).unwrap();
    loop {
        match run.run(&mut checkpoint).unwrap() {
            RunStatus::Suspended(_) => continue,
            RunStatus::Finished => break,
        }
    }
    (run.stop().unwrap(), checkpoint.suspensions)
}

// ============ Windows under sorting ============

#[test]
fn test_sorted_window_matches_reference() {
    // Sort by `id % 7` descending, ties by id ascending
    let mut reference: Vec<(i64, i64)> = (0..60).map(|id| (id % 7, id)).collect();
    reference.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    let reference: Vec<i64> = reference.into_iter().map(|(_, id)| id).collect();

    for (offset, limit) in [(0i64, 0i32), (0, 5), (3, 4), (10, 0), (58, 5), (70, 3)] {
        let select = Select::new("t")
            .with_order_by(vec![SortKey::desc(1), SortKey::asc(0)])
            .with_offset(offset);
        let result = run_to_end(select, limit, table(60));

        let expected: Vec<i64> = reference
            .iter()
            .copied()
            .skip(offset as usize)
            .take(if limit > 0 { limit as usize } else { usize::MAX })
            .collect();
        assert_eq!(column(&result, 0), expected, "offset {offset} limit {limit}");
        assert_eq!(result.row_count, expected.len());
    }
}

#[test]
fn test_unsorted_limit_stops_scan_early() {
    let select = Select::new("t")
        .with_filter(Filter::new(vec![Predicate::new(2, CompareOp::Eq, 0)]))
        .with_offset(2);
    let (result, suspensions) = run_suspending(select, 3, table(1000), 4);

    assert_eq!(column(&result, 0), vec![6, 9, 12]);
    // The scan ends after the fifth accepted row (id 12), well before row 1000
    assert!(suspensions <= 13 / 4, "suspended {suspensions} times");
}

#[test]
fn test_distinct_sorted_window() {
    let select = Select::new("t")
        .with_projection(vec![1])
        .with_distinct()
        .with_order_by(vec![SortKey::asc(0)])
        .with_offset(1);
    let result = run_to_end(select, 3, table(100));
    assert_eq!(column(&result, 0), vec![1, 2, 3]);
}

#[test]
fn test_grouped_window() {
    let select = Select::new("t")
        .with_group_by(vec![2], vec![Aggregate::count_star()])
        .with_order_by(vec![SortKey::asc(0)])
        .with_offset(1);
    let result = run_to_end(select, 0, table(30));
    assert_eq!(column(&result, 0), vec![1, 2]);
    assert_eq!(column(&result, 1), vec![10, 10]);
}

#[test]
fn test_sample_size_caps_accepted_rows() {
    let select = Select::new("t")
        .with_order_by(vec![SortKey::desc(0)])
        .with_sample_size(10);
    // Sampling caps the scan, then sorting orders what was sampled
    let result = run_to_end(select, 0, table(100));
    assert_eq!(column(&result, 0), (0..10).rev().collect::<Vec<_>>());
}

// ============ Suspension ============

#[test]
fn test_suspension_does_not_change_results() {
    let selects = || {
        vec![
            (Select::new("t"), 0),
            (Select::new("t").with_offset(17), 25),
            (Select::new("t").with_order_by(vec![SortKey::desc(2), SortKey::desc(0)]).with_offset(5), 12),
            (Select::new("t").with_projection(vec![1]).with_distinct(), 0),
            (
                Select::new("t").with_group_by(vec![1], vec![Aggregate::sum(0), Aggregate::max(2)]),
                0,
            ),
        ]
    };

    for ((select, max_rows), (same, _)) in selects().into_iter().zip(selects()) {
        let whole = run_to_end(select, max_rows, table(200));
        for every in [1, 3, 64] {
            let (resumed, _) = run_suspending(same.clone(), max_rows, table(200), every);
            assert_eq!(resumed, whole, "suspending every {every} rows");
        }
    }
}

#[test]
fn test_cancellation_is_observed_at_checkpoint() {
    struct Cancelled;

    impl YieldCheckpoint for Cancelled {
        fn yield_if_needed(&mut self, _row: i64) -> bool {
            false
        }

        fn is_cancelled(&self) -> bool {
            true
        }
    }

    let mut run = SelectRun::new(Arc::new(Select::new("t")), Vec::new(), 0);
    run.start(table(10)).unwrap();
    assert_eq!(run.run(&mut Cancelled), Err(ExecutorError::Cancelled));
    // The run is over; stopping it is refused
    assert!(run.stop().is_err());
}

#[test]
fn test_offset_parameter_type_checked() {
    let select = Select::new("t").with_offset(Datum::String("x".to_string()));
    let err = SelectRun::new(Arc::new(select), Vec::new(), 0)
        .execute(table(5), &mut RunToCompletion)
        .unwrap_err();
    assert!(matches!(err, ExecutorError::TypeMismatch { .. }));
}
