//! Statement commands
//!
//! A [`PreparedCommand`] binds a [`Statement`] to a [`Session`], a router
//! and a scheduler. Each `execute_query` / `execute_update` call creates a
//! [`CommandTask`], hands it to the scheduler and returns a
//! [`CommandFuture`] that resolves exactly once with the statement's
//! result. Success marks the session's statement completed; failure is
//! also recorded as the session's pending exception.

mod future;
mod prepared;
mod session;
mod statement;
mod task;

pub use future::{CommandFuture, ResultSlot};
pub use prepared::PreparedCommand;
pub use session::{Session, SessionStatus};
pub use statement::{Statement, StatementKind, DEFAULT_FETCH_SIZE};
pub use task::{CommandOutcome, CommandRequest, CommandTask, TaskState};
