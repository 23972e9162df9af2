//! Executor abstraction the scheduler hands runnable job wrappers to.
//!
//! The scheduler never runs job bodies itself. Once a job is eligible (it has
//! no mutex domain, or it was granted its domain's permit) the scheduler
//! boxes a wrapper into a [`Runnable`] and passes it to an [`Executor`]. An
//! executor may refuse the runnable, handing it back inside [`Rejected`]; the
//! scheduler then cancels the job and moves the permit on.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_jobs::core::{Executor, Rejected, Runnable};
//!
//! /// Runs every job inline on the submitting thread.
//! struct InlineExecutor;
//!
//! impl Executor for InlineExecutor {
//!     fn execute(&self, task: Runnable) -> Result<(), Rejected> {
//!         task();
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::worker_pool::WorkerPool;

/// A unit of work ready to run on some thread.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A runnable handed back by an executor that refused it.
///
/// Dropping it marks the wrapped job as cancelled by rejection.
pub struct Rejected {
    task: Runnable,
    reason: String,
}

impl Rejected {
    /// Wrap a refused runnable with the reason for the refusal.
    #[must_use]
    pub fn new(task: Runnable, reason: impl Into<String>) -> Self {
        Self {
            task,
            reason: reason.into(),
        }
    }

    /// Why the executor refused.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Take the runnable back, e.g. to retry it elsewhere.
    #[must_use]
    pub fn into_task(self) -> Runnable {
        self.task
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Runs job wrappers.
pub trait Executor: Send + Sync + 'static {
    /// Accept a runnable for execution, or hand it back.
    ///
    /// Must not run a job that blocks on another job inline, and must not
    /// block waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns the runnable inside [`Rejected`] when it cannot be accepted.
    fn execute(&self, task: Runnable) -> Result<(), Rejected>;

    /// Stop accepting work. Called once by [`Scheduler::shutdown`].
    ///
    /// [`Scheduler::shutdown`]: crate::core::Scheduler::shutdown
    fn shutdown(&self) {}
}

/// Creates the executor of a scheduler.
pub trait ExecutorFactory: Send + Sync {
    /// Build an executor for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Executor`] when the executor cannot start.
    fn create(&self, config: &SchedulerConfig) -> Result<Arc<dyn Executor>, SchedulerError>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&SchedulerConfig) -> Result<Arc<dyn Executor>, SchedulerError> + Send + Sync,
{
    fn create(&self, config: &SchedulerConfig) -> Result<Arc<dyn Executor>, SchedulerError> {
        self(config)
    }
}

/// Default factory: a dedicated [`WorkerPool`] built from
/// [`SchedulerConfig::worker_pool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPoolFactory;

impl ExecutorFactory for WorkerPoolFactory {
    fn create(&self, config: &SchedulerConfig) -> Result<Arc<dyn Executor>, SchedulerError> {
        let pool = WorkerPool::new(config.worker_pool.clone())
            .map_err(|e| SchedulerError::Executor(e.to_string()))?;
        Ok(Arc::new(pool))
    }
}

/// Adapter for a shared executor instance.
#[derive(Clone)]
pub struct SharedExecutorFactory(pub Arc<dyn Executor>);

impl ExecutorFactory for SharedExecutorFactory {
    fn create(&self, _config: &SchedulerConfig) -> Result<Arc<dyn Executor>, SchedulerError> {
        Ok(Arc::clone(&self.0))
    }
}
