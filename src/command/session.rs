//! Session state seen by statement execution

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::ExecutorError;
use crate::lock::TxnId;
use crate::txn::TimeoutConfig;

/// Where the session's current statement is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    StatementRunning,
    StatementCompleted,
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    /// Failure of the last statement, until the client collects it
    pending_exception: Option<ExecutorError>,
    /// Open explicit transaction (None = none open)
    current_txn: Option<TxnId>,
    timeout_config: TimeoutConfig,
}

/// Per-connection session
///
/// Shared between the connection and the command tasks it starts, so all
/// mutable state is behind a lock.
#[derive(Debug)]
pub struct Session {
    id: u64,
    /// Whether each statement commits on its own (default: true)
    autocommit: AtomicBool,
    cancel: Arc<AtomicBool>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a new session with default state
    pub fn new(id: u64) -> Self {
        Self {
            id,
            autocommit: AtomicBool::new(true),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.state.lock().status = status;
    }

    /// Record a statement failure for the client to observe
    pub fn set_pending_exception(&self, error: ExecutorError) {
        self.state.lock().pending_exception = Some(error);
    }

    pub fn pending_exception(&self) -> Option<ExecutorError> {
        self.state.lock().pending_exception.clone()
    }

    /// Collect and clear the pending exception
    pub fn take_pending_exception(&self) -> Option<ExecutorError> {
        self.state.lock().pending_exception.take()
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit.load(Ordering::Acquire)
    }

    pub fn set_autocommit(&self, enabled: bool) {
        self.autocommit.store(enabled, Ordering::Release);
    }

    /// Check if we're in an explicit transaction
    pub fn in_transaction(&self) -> bool {
        self.current_txn().is_some()
    }

    pub fn current_txn(&self) -> Option<TxnId> {
        self.state.lock().current_txn
    }

    pub fn begin_transaction(&self, txn_id: TxnId) {
        self.state.lock().current_txn = Some(txn_id);
    }

    /// End the current transaction, returning it
    pub fn end_transaction(&self) -> Option<TxnId> {
        self.state.lock().current_txn.take()
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        self.state.lock().timeout_config.clone()
    }

    pub fn set_timeout_config(&self, config: TimeoutConfig) {
        self.state.lock().timeout_config = config;
    }

    /// Cancel the running statement at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Clear a cancel request before a new statement starts
    pub(crate) fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Release);
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let session = Session::new(7);
        assert_eq!(session.id(), 7);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.autocommit());
        assert!(!session.in_transaction());
        assert!(session.pending_exception().is_none());
    }

    #[test]
    fn test_transaction_and_exception() {
        let session = Session::new(1);
        session.begin_transaction(9);
        assert_eq!(session.current_txn(), Some(9));
        assert_eq!(session.end_transaction(), Some(9));
        assert_eq!(session.end_transaction(), None);

        session.set_pending_exception(ExecutorError::Cancelled);
        assert_eq!(session.pending_exception(), Some(ExecutorError::Cancelled));
        assert_eq!(session.take_pending_exception(), Some(ExecutorError::Cancelled));
        assert!(session.pending_exception().is_none());
    }

    #[test]
    fn test_cancel() {
        let session = Session::new(1);
        let flag = session.cancel_flag();
        session.cancel();
        assert!(flag.load(Ordering::Acquire));
        session.reset_cancel();
        assert!(!session.is_cancelled());
    }
}
