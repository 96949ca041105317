//! YieldSQL - cooperative statement execution for a distributed SQL engine
//!
//! Features:
//! - Resumable command tasks driven by a round-robin scheduler that yields
//!   at row checkpoints, lock waits and storage calls
//! - Query operators with offset, limit and sampling that stay correct
//!   under sorting, distinct and grouping
//! - Row and column level locking with per-transaction lock timeouts
//! - Versioned storage put acknowledgments naming every local transaction
//!   branch a put opened

pub mod command;
pub mod distributed;
pub mod executor;
pub mod lock;
pub mod protocol;
pub mod router;
pub mod scheduler;
pub mod storage;
pub mod txn;
