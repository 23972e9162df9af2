//! Error types for scheduler operations.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// A caller waiting for a job's outcome gave up.
    Await,
    /// A blocking-condition wait elapsed before the condition was released.
    WaitFor,
    /// The job was not started before its expiration deadline.
    Expired,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Await => write!(f, "await elapsed"),
            Self::WaitFor => write!(f, "wait-for elapsed"),
            Self::Expired => write!(f, "expired before start"),
        }
    }
}

/// Outcome errors of a job, as seen by result retrievers and job bodies.
///
/// Cloneable so every waiter of the same job observes the same error.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job was cancelled with interruption while suspended.
    #[error("job interrupted")]
    Interrupted,
    /// A deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(TimeoutKind),
    /// The job was cancelled, explicitly or because the executor rejected it.
    #[error("job cancelled")]
    Cancelled,
    /// The job body returned an error or panicked.
    #[error("job failed: {0}")]
    TaskFailed(Arc<anyhow::Error>),
    /// A deferred queue consumer failed on a batch.
    #[error("batch consumer failed: {0}")]
    ConsumerFailed(Arc<anyhow::Error>),
}

impl JobError {
    /// Wrap a body error.
    #[must_use]
    pub fn task_failed(err: anyhow::Error) -> Self {
        // Bodies commonly propagate a wait-for interruption or timeout through
        // `?`; keep those kinds intact instead of nesting them.
        match err.downcast::<Self>() {
            Ok(job_error) => job_error,
            Err(err) => Self::TaskFailed(Arc::new(err)),
        }
    }

    /// Whether this is [`JobError::Interrupted`].
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether this is any [`JobError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether this is [`JobError::Cancelled`].
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The executor could not be created.
    #[error("executor error: {0}")]
    Executor(String),
    /// A job holding a mutex permit tried to wait for other jobs.
    #[error("cannot await jobs while holding the permit of mutex domain `{0}`")]
    AwaitWhileHoldingPermit(String),
}
