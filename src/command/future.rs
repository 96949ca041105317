//! Write-once result delivery

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::executor::{ExecutorError, ExecutorResult};

/// Sending half of a command's result
///
/// Accepts exactly one result; later writes are ignored.
#[derive(Debug)]
pub struct ResultSlot<T> {
    tx: Option<oneshot::Sender<ExecutorResult<T>>>,
}

impl<T> ResultSlot<T> {
    /// Create a slot and the future that receives its result
    pub fn new() -> (Self, CommandFuture<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, CommandFuture { rx })
    }

    /// Store the result; returns false if one was already stored
    pub fn complete(&mut self, result: ExecutorResult<T>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // Nobody listening is fine: the caller dropped the future
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tx.is_none()
    }
}

/// Resolves to a command's result
///
/// Dropping the future does not cancel the command. If the command is
/// dropped without completing, the future resolves to an internal error.
#[derive(Debug)]
pub struct CommandFuture<T> {
    rx: oneshot::Receiver<ExecutorResult<T>>,
}

impl<T> CommandFuture<T> {
    /// A future that is already resolved
    pub fn ready(result: ExecutorResult<T>) -> Self {
        let (mut slot, future) = ResultSlot::new();
        slot.complete(result);
        future
    }
}

impl<T> Future for CommandFuture<T> {
    type Output = ExecutorResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ExecutorError::Internal(
                    "command dropped before completing".to_string(),
                ))
            })
        })
    }
}
