//! Coordinator side of a distributed transaction

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::{PutOutcome, StoragePutAck};
use crate::txn::{parse_branch_name, TransactionManager, TransactionResult};

use super::{DistributedError, DistributedResult};

/// Finishes local branches on one storage node
#[async_trait]
pub trait BranchResolver: Send + Sync {
    async fn commit_branch(&self, name: &str) -> TransactionResult<()>;

    async fn rollback_branch(&self, name: &str) -> TransactionResult<()>;
}

#[async_trait]
impl BranchResolver for TransactionManager {
    async fn commit_branch(&self, name: &str) -> TransactionResult<()> {
        self.commit_by_name(name)
    }

    async fn rollback_branch(&self, name: &str) -> TransactionResult<()> {
        self.rollback_by_name(name).await
    }
}

/// A transaction spanning branches on several storage nodes
///
/// Branch names come from put acknowledgments; the node part of each name
/// selects the resolver that finishes it.
pub struct DistributedTransaction {
    name: String,
    branches: Vec<String>,
    resolvers: HashMap<String, Arc<dyn BranchResolver>>,
}

impl DistributedTransaction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
            resolvers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the resolver for branches opened on `node`
    pub fn add_node(&mut self, node: impl Into<String>, resolver: Arc<dyn BranchResolver>) {
        self.resolvers.insert(node.into(), resolver);
    }

    /// Record the branches named in `ack` and return its outcome
    pub fn register_ack(&mut self, ack: &StoragePutAck) -> DistributedResult<PutOutcome> {
        let outcome = ack.outcome()?;
        for branch in ack.transaction_names() {
            if !self.branches.contains(&branch) {
                self.branches.push(branch);
            }
        }
        tracing::trace!(
            txn = %self.name,
            rows_affected = outcome.rows_affected,
            branches = self.branches.len(),
            "Registered put ack"
        );
        Ok(outcome)
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    /// Commit every branch
    ///
    /// All branches are routed before any is committed, so an unknown node
    /// fails the commit without finishing anything.
    pub async fn commit(self) -> DistributedResult<()> {
        let routed = self.route()?;
        for (branch, resolver) in &routed {
            resolver
                .commit_branch(branch)
                .await
                .map_err(|source| DistributedError::Branch {
                    branch: branch.to_string(),
                    source,
                })?;
        }
        tracing::debug!(txn = %self.name, branches = routed.len(), "Committed distributed transaction");
        Ok(())
    }

    /// Roll back every branch, continuing past failures
    ///
    /// Returns the first failure after all branches were attempted.
    pub async fn rollback(self) -> DistributedResult<()> {
        let mut first_error = None;
        for branch in &self.branches {
            let result = match self.resolver_for(branch) {
                Ok(resolver) => resolver
                    .rollback_branch(branch)
                    .await
                    .map_err(|source| DistributedError::Branch {
                        branch: branch.clone(),
                        source,
                    }),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(txn = %self.name, branch = %branch, error = %e, "Branch rollback failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!(txn = %self.name, branches = self.branches.len(), "Rolled back distributed transaction");
                Ok(())
            }
        }
    }

    fn route(&self) -> DistributedResult<Vec<(&str, &Arc<dyn BranchResolver>)>> {
        let mut routed = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            routed.push((branch.as_str(), self.resolver_for(branch)?));
        }
        Ok(routed)
    }

    fn resolver_for(&self, branch: &str) -> DistributedResult<&Arc<dyn BranchResolver>> {
        parse_branch_name(branch)
            .and_then(|(node, _)| self.resolvers.get(node))
            .ok_or_else(|| DistributedError::UnknownNode(branch.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::PutHandler;
    use crate::executor::{Datum, Row, RowKey};
    use crate::lock::LockManager;
    use crate::protocol::{PutEntry, StoragePut};
    use crate::storage::{MemoryStorage, StorageEngine};

    async fn node(name: &str) -> (Arc<MemoryStorage>, Arc<TransactionManager>) {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_table("t").await.unwrap();
        storage
            .insert("t", "p0", RowKey::from(1), Row::new(vec![Datum::Int(1), Datum::Int(0)]))
            .await
            .unwrap();
        let manager = Arc::new(TransactionManager::new(
            name,
            storage.clone(),
            Arc::new(LockManager::new()),
        ));
        (storage, manager)
    }

    fn put(value: i64) -> StoragePut {
        StoragePut {
            coordinator_txn: "coord:7".to_string(),
            table: "t".to_string(),
            entries: vec![PutEntry {
                row_key: RowKey::from(1),
                assignments: vec![(1, Datum::Int(value))],
            }],
            partitions: None,
        }
    }

    async fn column(storage: &MemoryStorage) -> Datum {
        let row = storage.get("t", &RowKey::from(1)).await.unwrap().unwrap();
        row.get(1).unwrap().clone()
    }

    #[tokio::test]
    async fn test_commit_across_nodes() {
        let (storage_a, node_a) = node("a").await;
        let (storage_b, node_b) = node("b").await;

        let mut txn = DistributedTransaction::new("coord:7");
        txn.add_node("a", node_a.clone());
        txn.add_node("b", node_b.clone());
        for (handler, value) in [(PutHandler::new(node_a.clone()), 5), (PutHandler::new(node_b.clone()), 6)] {
            let ack = handler.handle(&put(value)).await.unwrap();
            assert_eq!(txn.register_ack(&ack).unwrap().rows_affected, 1);
        }
        assert_eq!(txn.branches().len(), 2);

        txn.commit().await.unwrap();
        assert_eq!(node_a.active_count(), 0);
        assert_eq!(node_b.active_count(), 0);
        assert_eq!(column(&storage_a).await, Datum::Int(5));
        assert_eq!(column(&storage_b).await, Datum::Int(6));
    }

    #[tokio::test]
    async fn test_rollback_restores_rows() {
        let (storage_a, node_a) = node("a").await;
        let mut txn = DistributedTransaction::new("coord:8");
        txn.add_node("a", node_a.clone());
        let ack = PutHandler::new(node_a.clone()).handle(&put(9)).await.unwrap();
        txn.register_ack(&ack).unwrap();
        assert_eq!(column(&storage_a).await, Datum::Int(9));

        txn.rollback().await.unwrap();
        assert_eq!(column(&storage_a).await, Datum::Int(0));
        assert_eq!(node_a.lock_manager().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_commits_nothing() {
        let (_storage, node_a) = node("a").await;
        let mut txn = DistributedTransaction::new("coord:9");
        txn.add_node("a", node_a.clone());
        let ack = PutHandler::new(node_a.clone()).handle(&put(3)).await.unwrap();
        txn.register_ack(&ack).unwrap();
        txn.register_ack(&StoragePutAck::from_outcome(PutOutcome { rows_affected: 0 }, &["z:4"]).unwrap())
            .unwrap();

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, DistributedError::UnknownNode(ref b) if b == "z:4"));
        // The branch on node a is still open
        assert_eq!(node_a.active_count(), 1);
    }
}
