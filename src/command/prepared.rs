//! Statement execution entry points

use std::sync::Arc;

use crate::executor::{Datum, ExecutorError, QueryResult};
use crate::router::{QueryOptions, Router};
use crate::scheduler::TaskSpawner;
use crate::storage::PartitionKey;

use super::future::CommandFuture;
use super::session::Session;
use super::statement::Statement;
use super::task::{CommandOutcome, CommandRequest, CommandTask};

/// A bound statement ready to run on a scheduler
///
/// Every `execute_*` call creates a fresh command task, submits it and
/// returns a future for its result.
#[derive(Clone)]
pub struct PreparedCommand {
    statement: Arc<Statement>,
    session: Arc<Session>,
    router: Arc<dyn Router>,
    spawner: TaskSpawner,
}

impl PreparedCommand {
    pub fn new(
        statement: Arc<Statement>,
        session: Arc<Session>,
        router: Arc<dyn Router>,
        spawner: TaskSpawner,
    ) -> Self {
        Self {
            statement,
            session,
            router,
            spawner,
        }
    }

    pub fn statement(&self) -> &Arc<Statement> {
        &self.statement
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_query(&self) -> bool {
        self.statement.is_query()
    }

    pub fn fetch_size(&self) -> i32 {
        self.statement.fetch_size()
    }

    pub fn parameters(&self) -> &[Datum] {
        self.statement.parameters()
    }

    /// Run the query, returning at most `max_rows` rows (`<= 0`: all)
    pub fn execute_query(
        &self,
        max_rows: i32,
        scrollable: bool,
        partitions: Option<Vec<PartitionKey>>,
    ) -> CommandFuture<QueryResult> {
        if !self.is_query() {
            return CommandFuture::ready(Err(ExecutorError::InvalidStatement(
                "executeQuery on an update".to_string(),
            )));
        }
        self.submit(CommandRequest::Query(QueryOptions {
            max_rows,
            scrollable,
            partitions,
        }))
    }

    /// Run the update, resolving to the number of rows changed
    pub fn execute_update(&self, partitions: Option<Vec<PartitionKey>>) -> CommandFuture<u64> {
        if self.is_query() {
            return CommandFuture::ready(Err(ExecutorError::InvalidStatement(
                "executeUpdate on a query".to_string(),
            )));
        }
        self.submit(CommandRequest::Update { partitions })
    }

    fn submit<T: CommandOutcome>(&self, request: CommandRequest) -> CommandFuture<T> {
        let (task, future) = CommandTask::<T>::new(
            self.statement.clone(),
            self.session.clone(),
            self.router.clone(),
            request,
        );
        // A refused task is dropped, which resolves the future with an error
        self.spawner.submit(Box::new(task));
        future
    }
}
