//! Storage node side of a distributed put

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::executor::{ExecutorError, ExecutorResult};
use crate::protocol::{FrameReader, FrameWriter, PutOutcome, StoragePut, StoragePutAck};
use crate::storage::{PartitionKey, StorageError};
use crate::txn::{LocalTransaction, TransactionManager};

use super::DistributedResult;

/// Applies puts and reports the branches they opened
pub struct PutHandler {
    txn_manager: Arc<TransactionManager>,
}

impl PutHandler {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self { txn_manager }
    }

    /// Apply `put`, one local branch per partition touched
    ///
    /// Branches stay open for the coordinator to commit or roll back by
    /// name. If any entry fails, every branch opened so far is rolled back
    /// and the error is returned instead of an ack.
    pub async fn handle(&self, put: &StoragePut) -> DistributedResult<StoragePutAck> {
        let mut branches: Vec<(PartitionKey, LocalTransaction)> = Vec::new();
        match self.apply(put, &mut branches).await {
            Ok(rows_affected) => {
                let names: Vec<&str> = branches.iter().map(|(_, txn)| txn.name.as_str()).collect();
                tracing::debug!(
                    coordinator = %put.coordinator_txn,
                    table = %put.table,
                    rows_affected,
                    branches = names.len(),
                    "Put applied"
                );
                Ok(StoragePutAck::from_outcome(
                    PutOutcome { rows_affected },
                    &names,
                )?)
            }
            Err(e) => {
                for (_, txn) in branches {
                    if let Err(rollback_error) = self.txn_manager.rollback(txn.txn_id).await {
                        tracing::warn!(
                            branch = %txn.name,
                            error = %rollback_error,
                            "Rollback of put branch failed"
                        );
                    }
                }
                tracing::debug!(coordinator = %put.coordinator_txn, error = %e, "Put failed");
                Err(e.into())
            }
        }
    }

    async fn apply(
        &self,
        put: &StoragePut,
        branches: &mut Vec<(PartitionKey, LocalTransaction)>,
    ) -> ExecutorResult<u64> {
        let storage = self.txn_manager.storage();
        let locks = self.txn_manager.lock_manager();
        let lock_timeout = self.txn_manager.lock_timeout();
        let table = put.table.as_str();
        let mut rows_affected = 0;

        for entry in &put.entries {
            let partition = storage
                .partition_of(table, &entry.row_key)
                .await?
                .ok_or_else(|| StorageError::RowNotFound {
                    table: table.to_string(),
                    key: entry.row_key.to_string(),
                })?;
            if let Some(targets) = &put.partitions {
                if !targets.contains(&partition) {
                    return Err(ExecutorError::InvalidStatement(format!(
                        "row {} is in partition {}, outside the put's targets",
                        entry.row_key, partition
                    )));
                }
            }

            let txn_id = match branches.iter().find(|(p, _)| *p == partition) {
                Some((_, txn)) => txn.txn_id,
                None => {
                    let txn = self.txn_manager.begin();
                    let txn_id = txn.txn_id;
                    branches.push((partition, txn));
                    txn_id
                }
            };

            for (column, _) in &entry.assignments {
                locks
                    .acquire_column(table, &entry.row_key, *column, txn_id, lock_timeout)
                    .await?;
            }
            let old_values = storage
                .update_columns(table, &entry.row_key, &entry.assignments)
                .await?;
            self.txn_manager
                .record_update(txn_id, table, entry.row_key.clone(), old_values)?;
            rows_affected += 1;
        }
        Ok(rows_affected)
    }

    /// Answer one put read from `reader` with an ack on `writer`
    pub async fn serve_one<R, W>(
        &self,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> DistributedResult<StoragePutAck>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let put: StoragePut = reader.read_packet().await?;
        let ack = self.handle(&put).await?;
        writer.write_packet(&ack).await?;
        writer.flush().await?;
        Ok(ack)
    }
}
