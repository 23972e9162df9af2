//! Tokio runtime executor implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::core::{Executor, Rejected, Runnable, SchedulerError};

/// Executor that runs job wrappers on a tokio runtime's blocking thread pool.
///
/// Job bodies block (on conditions, sleeps, consumers), so they must not run
/// on the runtime's async worker threads.
#[derive(Clone)]
pub struct TokioBlockingExecutor {
    handle: Arc<tokio::runtime::Handle>,
    shut_down: Arc<AtomicBool>,
}

impl TokioBlockingExecutor {
    /// Create an executor from a tokio runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Arc::new(handle),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an executor on the runtime of the calling task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Executor`] when called outside a tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::Executor(e.to_string()))
    }
}

impl Executor for TokioBlockingExecutor {
    fn execute(&self, task: Runnable) -> Result<(), Rejected> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Rejected::new(task, "tokio executor shut down"));
        }
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("tokio blocking executor stopped accepting jobs");
        }
    }
}
