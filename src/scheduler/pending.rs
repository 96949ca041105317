//! Async calls made from scheduler tasks
//!
//! A task must not block its worker on storage I/O. It spawns the call on a
//! tokio runtime instead, parks, and is woken when the result is in.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};

use super::scheduler::TaskWaker;
use crate::executor::{ExecutorError, ExecutorResult};

/// Result of an async call that has not been collected yet
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T: Send + 'static> Pending<T> {
    /// Run `future` on `runtime`, waking `waker` once it has completed
    pub fn spawn<F>(runtime: &Handle, waker: TaskWaker, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            // The task may have been dropped meanwhile
            let _ = tx.send(future.await);
            waker.wake();
        });
        Pending { rx }
    }

    /// Take the result if it has arrived
    ///
    /// Fails if the spawned call was dropped without producing a result,
    /// e.g. because the runtime shut down.
    pub fn try_take(&mut self) -> ExecutorResult<Option<T>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(ExecutorError::Internal(
                "async call dropped before completing".to_string(),
            )),
        }
    }
}
