//! Distributed write plumbing
//!
//! The storage node side ([`PutHandler`]) applies a [`StoragePut`] inside
//! one local transaction branch per partition it touches and answers with a
//! [`StoragePutAck`] naming every branch. The coordinator side
//! ([`DistributedTransaction`]) collects those names from the acks and later
//! commits or rolls back each branch on the node that owns it.
//!
//! [`StoragePut`]: crate::protocol::StoragePut
//! [`StoragePutAck`]: crate::protocol::StoragePutAck

mod coordinator;
mod put;

pub use coordinator::{BranchResolver, DistributedTransaction};
pub use put::PutHandler;

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::protocol::ProtocolError;
use crate::txn::TransactionError;

/// Errors of distributed write handling
#[derive(Error, Debug)]
pub enum DistributedError {
    /// Applying the put failed; its branches were rolled back
    #[error("Put failed: {0}")]
    Put(#[from] ExecutorError),

    /// Encoding or decoding a packet failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Committing or rolling back a branch failed
    #[error("Branch {branch} failed: {source}")]
    Branch {
        branch: String,
        source: TransactionError,
    },

    /// No node registered for a branch name
    #[error("No node for branch {0}")]
    UnknownNode(String),
}

/// Result type for distributed operations
pub type DistributedResult<T> = Result<T, DistributedError>;
