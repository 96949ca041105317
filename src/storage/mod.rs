//! Storage engine subsystem
//!
//! The executor reaches rows only through the [`StorageEngine`] trait. The
//! in-memory engine backs tests and embedded use.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStorage, DEFAULT_PARTITION};
pub use traits::{KeyedRow, PartitionKey, StorageEngine};
