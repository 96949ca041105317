//! End-to-end command tests: prepared statements run on a scheduler thread
//! against a local router and memory storage

mod test_utils;

use std::time::Duration;

use yieldsql::command::{SessionStatus, Statement};
use yieldsql::executor::{
    CompareOp, Datum, ExecutorError, Filter, Operand, Predicate, Select, SortKey, Update,
};
use yieldsql::scheduler::SchedulerConfig;
use yieldsql::storage::{StorageEngine, StorageError};
use yieldsql::txn::TimeoutConfig;

use test_utils::node::{fixture_row, TestNode, TABLE};

fn ids(rows: &[yieldsql::executor::Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| row.get(0).unwrap().as_int().unwrap())
        .collect()
}

fn where_id(op: CompareOp, id: i64) -> Filter {
    Filter::new(vec![Predicate::new(0, op, id)])
}

// ============ Queries ============

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sorted_query_window() {
    let node = TestNode::start(50).await;
    let session = node.session();
    let select = Select::new(TABLE)
        .with_order_by(vec![SortKey::desc(0)])
        .with_offset(2);

    let result = node
        .prepare(Statement::query(select), &session)
        .execute_query(3, false, None)
        .await
        .unwrap();

    assert_eq!(ids(&result.rows), vec![48, 47, 46]);
    assert_eq!(result.row_count, 3);
    assert_eq!(session.status(), SessionStatus::StatementCompleted);
    assert!(session.pending_exception().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_query_with_bound_parameters() {
    let node = TestNode::start(20).await;
    let session = node.session();
    let select = Select::new(TABLE)
        .with_filter(Filter::new(vec![Predicate::new(
            0,
            CompareOp::GtEq,
            Operand::Parameter(0),
        )]))
        .with_projection(vec![1])
        .with_offset(Operand::Parameter(1));
    let statement = Statement::query(select).with_parameters(vec![Datum::Int(15), Datum::Int(1)]);

    let result = node
        .prepare(statement, &session)
        .execute_query(0, false, None)
        .await
        .unwrap();

    // Ids 15..=20, offset 1, projected to `id * 10`
    assert_eq!(ids(&result.rows), vec![160, 170, 180, 190, 200]);
    assert_eq!(result.column_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_query_partition_targets() {
    let node = TestNode::start(10).await;
    let session = node.session();
    let statement = Statement::query(Select::new(TABLE)).with_partitions(vec!["p0".to_string()]);
    let command = node.prepare(statement, &session);

    let even = command.execute_query(0, false, None).await.unwrap();
    assert_eq!(ids(&even.rows), vec![2, 4, 6, 8, 10]);

    // Execution-time targets override the statement's
    let odd = command
        .execute_query(0, false, Some(vec!["p1".to_string()]))
        .await
        .unwrap();
    assert_eq!(ids(&odd.rows), vec![1, 3, 5, 7, 9]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queries_share_scheduler_round_robin() {
    let config = SchedulerConfig::default()
        .with_yield_interval_rows(8)
        .with_yield_when_idle(true);
    let node = TestNode::start_with(200, config).await;

    let futures: Vec<_> = (0..3)
        .map(|_| {
            let session = node.session();
            node.prepare(Statement::query(Select::new(TABLE)), &session)
                .execute_query(0, false, None)
        })
        .collect();
    for future in futures {
        let result = future.await.unwrap();
        assert_eq!(result.row_count, 200);
        assert_eq!(ids(&result.rows), (1..=200).collect::<Vec<_>>());
    }

    let metrics = node.scheduler.metrics();
    assert_eq!(metrics.submitted, 3);
    // Each 200-row scan yields every 8 rows
    assert!(metrics.yields >= 3 * 20, "yields: {}", metrics.yields);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_sets_pending_exception() {
    let node = TestNode::start(5).await;
    let session = node.session();
    let select = Select::new(TABLE).with_offset(Operand::Parameter(0));

    let err = node
        .prepare(Statement::query(select), &session)
        .execute_query(0, false, None)
        .await
        .unwrap_err();

    assert_eq!(err, ExecutorError::InvalidParameter { index: 0, count: 0 });
    assert_eq!(session.pending_exception(), Some(err));
    assert_eq!(session.status(), SessionStatus::StatementRunning);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_entry_point_is_rejected() {
    let node = TestNode::start(1).await;
    let session = node.session();
    let command = node.prepare(Statement::update(Update::new(TABLE)), &session);

    let err = command.execute_query(0, false, None).await.unwrap_err();
    assert!(matches!(err, ExecutorError::InvalidStatement(_)));
    assert_eq!(node.scheduler.metrics().submitted, 0);
}

// ============ Updates ============

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_autocommit() {
    let node = TestNode::start(10).await;
    let session = node.session();
    let update = Update::new(TABLE)
        .with_filter(where_id(CompareOp::Lt, 5))
        .with_assignment(2, 7);

    let affected = node
        .prepare(Statement::update(update), &session)
        .execute_update(None)
        .await
        .unwrap();

    assert_eq!(affected, 4);
    assert_eq!(node.column(3, 2).await, Some(Datum::Int(7)));
    assert_eq!(node.column(5, 2).await, Some(Datum::Int(0)));
    assert!(!session.in_transaction());
    assert_eq!(node.txn_manager.active_count(), 0);
    assert_eq!(node.txn_manager.lock_manager().entry_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_transaction_rollback() {
    let node = TestNode::start(10).await;
    let session = node.session();
    session.set_autocommit(false);
    let command = node.prepare(
        Statement::update(
            Update::new(TABLE)
                .with_filter(where_id(CompareOp::GtEq, 9))
                .with_assignment(1, Operand::Parameter(0)),
        )
        .with_parameters(vec![Datum::Int(-1)]),
        &session,
    );

    assert_eq!(command.execute_update(None).await.unwrap(), 2);
    assert!(session.in_transaction());
    assert_eq!(node.column(10, 1).await, Some(Datum::Int(-1)));

    // A second statement joins the open transaction
    assert_eq!(command.execute_update(None).await.unwrap(), 2);
    assert_eq!(node.txn_manager.active_count(), 1);

    node.router.rollback(&session).await.unwrap();
    assert!(!session.in_transaction());
    assert_eq!(node.column(9, 1).await, Some(Datum::Int(90)));
    assert_eq!(node.column(10, 1).await, Some(Datum::Int(100)));
    assert_eq!(node.txn_manager.lock_manager().entry_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_key_change_moves_row() {
    let node = TestNode::start(3).await;
    let session = node.session();
    let update = Update::new(TABLE)
        .with_filter(where_id(CompareOp::Eq, 2))
        .with_assignment(0, 20)
        .with_key_columns(vec![0]);

    let affected = node
        .prepare(Statement::update(update), &session)
        .execute_update(None)
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(node.column(2, 0).await, None);
    assert_eq!(node.column(20, 0).await, Some(Datum::Int(20)));
    assert_eq!(node.column(20, 1).await, Some(Datum::Int(20)));
    assert_eq!(node.storage.row_count(TABLE), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_autocommit_update_rolls_back() {
    let node = TestNode::start(3).await;
    let session = node.session();
    // Moving row 2 onto key 1 collides after row 2 was already removed
    let update = Update::new(TABLE)
        .with_filter(where_id(CompareOp::Eq, 2))
        .with_assignment(0, 1)
        .with_key_columns(vec![0]);

    let err = node
        .prepare(Statement::update(update), &session)
        .execute_update(None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutorError::Storage(StorageError::DuplicateKey { .. })
    ));
    assert_eq!(session.pending_exception(), Some(err));
    let restored = node
        .storage
        .get(TABLE, &yieldsql::executor::RowKey::from(2))
        .await
        .unwrap();
    assert_eq!(restored, Some(fixture_row(2)));
    assert_eq!(node.txn_manager.active_count(), 0);
    assert_eq!(node.txn_manager.lock_manager().entry_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_waiting_for_lock() {
    let node = TestNode::start(3).await;
    let holder = node.session();
    holder.set_autocommit(false);
    let waiter = node.session();
    waiter.set_timeout_config(TimeoutConfig::default().with_lock_timeout(Duration::from_secs(30)));

    let update = || {
        Statement::update(
            Update::new(TABLE)
                .with_filter(where_id(CompareOp::Eq, 1))
                .with_assignment(2, 5),
        )
    };
    node.prepare(update(), &holder)
        .execute_update(None)
        .await
        .unwrap();

    let blocked = node.prepare(update(), &waiter).execute_update(None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    waiter.cancel();

    assert_eq!(blocked.await, Err(ExecutorError::Cancelled));
    assert_eq!(waiter.pending_exception(), Some(ExecutorError::Cancelled));

    // The holder is unaffected
    node.router.commit(&holder).unwrap();
    assert_eq!(node.column(1, 2).await, Some(Datum::Int(5)));
    assert_eq!(node.txn_manager.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_fails_later_commands() {
    let node = TestNode::start(1).await;
    let session = node.session();
    let command = node.prepare(Statement::query(Select::new(TABLE)), &session);

    node.scheduler.shutdown();
    let err = command
        .execute_query(0, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Internal(_)));
}
