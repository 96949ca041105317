//! Bound statements

use std::sync::Arc;

use crate::executor::{Datum, Select, Update};
use crate::storage::PartitionKey;

/// Default number of rows a client fetches per round trip
pub const DEFAULT_FETCH_SIZE: i32 = 100;

/// Query/update discriminator with the resolved statement
#[derive(Debug, Clone)]
pub enum StatementKind {
    Query(Arc<Select>),
    Update(Arc<Update>),
}

/// A prepared statement with its parameters bound
///
/// Immutable once built; shared with command tasks through `Arc`.
#[derive(Debug, Clone)]
pub struct Statement {
    kind: StatementKind,
    fetch_size: i32,
    parameters: Vec<Datum>,
    partitions: Option<Vec<PartitionKey>>,
}

impl Statement {
    pub fn query(select: Select) -> Self {
        Self::new(StatementKind::Query(Arc::new(select)))
    }

    pub fn update(update: Update) -> Self {
        Self::new(StatementKind::Update(Arc::new(update)))
    }

    fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            fetch_size: DEFAULT_FETCH_SIZE,
            parameters: Vec::new(),
            partitions: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Datum>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: i32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Restrict execution to these storage partitions
    pub fn with_partitions(mut self, partitions: Vec<PartitionKey>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind, StatementKind::Query(_))
    }

    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    pub fn parameters(&self) -> &[Datum] {
        &self.parameters
    }

    pub fn partitions(&self) -> Option<&[PartitionKey]> {
        self.partitions.as_deref()
    }
}
