//! Single storage node fixture
//!
//! Wires memory storage, a transaction manager, a local router and a
//! scheduler thread together the way a storage node does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use yieldsql::command::{PreparedCommand, Session, Statement};
use yieldsql::executor::{Datum, Row, RowKey};
use yieldsql::lock::LockManager;
use yieldsql::router::LocalRouter;
use yieldsql::scheduler::{SchedulerConfig, SchedulerHandle};
use yieldsql::storage::{MemoryStorage, StorageEngine};
use yieldsql::txn::TransactionManager;

/// Table every fixture node creates
pub const TABLE: &str = "t";

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Row `id` of the fixture table: `(id, id * 10, 0)`
pub fn fixture_row(id: i64) -> Row {
    Row::new(vec![Datum::Int(id), Datum::Int(id * 10), Datum::Int(0)])
}

pub struct TestNode {
    pub storage: Arc<MemoryStorage>,
    pub txn_manager: Arc<TransactionManager>,
    pub router: Arc<LocalRouter>,
    pub scheduler: SchedulerHandle,
}

impl TestNode {
    /// Start a node whose table holds rows `1..=rows`, alternating between
    /// partitions `p0` and `p1`
    #[allow(dead_code)]
    pub async fn start(rows: i64) -> Self {
        Self::start_with(rows, SchedulerConfig::default()).await
    }

    pub async fn start_with(rows: i64, config: SchedulerConfig) -> Self {
        super::init_tracing();
        let storage = Arc::new(MemoryStorage::new());
        storage.create_table(TABLE).await.unwrap();
        for id in 1..=rows {
            let partition = format!("p{}", id % 2);
            storage
                .insert(TABLE, &partition, RowKey::from(id), fixture_row(id))
                .await
                .unwrap();
        }
        let txn_manager = Arc::new(TransactionManager::new(
            "node-1",
            storage.clone(),
            Arc::new(LockManager::new()),
        ));
        let router = Arc::new(LocalRouter::new(txn_manager.clone(), Handle::current()));
        let scheduler = SchedulerHandle::spawn(config).unwrap();
        TestNode {
            storage,
            txn_manager,
            router,
            scheduler,
        }
    }

    /// A fresh session with default settings
    pub fn session(&self) -> Arc<Session> {
        Arc::new(Session::new(NEXT_SESSION.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn prepare(&self, statement: Statement, session: &Arc<Session>) -> PreparedCommand {
        PreparedCommand::new(
            Arc::new(statement),
            session.clone(),
            self.router.clone(),
            self.scheduler.spawner(),
        )
    }

    /// Current value of one column of row `id`, `None` if the row is gone
    #[allow(dead_code)]
    pub async fn column(&self, id: i64, column: usize) -> Option<Datum> {
        self.storage
            .get(TABLE, &RowKey::from(id))
            .await
            .unwrap()
            .map(|row| row.get(column).unwrap().clone())
    }
}
