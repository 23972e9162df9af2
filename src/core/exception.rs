//! Handling of failures nobody is waiting for.

use tracing::error;

use crate::core::error::JobError;
use crate::core::future::JobId;
use crate::core::mutex_registry::MutexDomain;

/// Where an unobserved failure happened.
#[derive(Debug, Clone)]
pub struct FailureOrigin {
    /// Failing job, if the failure belongs to one.
    pub job_id: Option<JobId>,
    /// Job or component name.
    pub name: String,
    /// Mutex domain of the job.
    pub domain: Option<MutexDomain>,
}

/// Receives job failures that no caller is awaiting, and deferred queue
/// consumer failures.
pub trait ExceptionHandler: Send + Sync {
    /// Handle one failure.
    fn handle(&self, origin: &FailureOrigin, error: &JobError);
}

impl<F> ExceptionHandler for F
where
    F: Fn(&FailureOrigin, &JobError) + Send + Sync,
{
    fn handle(&self, origin: &FailureOrigin, error: &JobError) {
        self(origin, error);
    }
}

/// Default handler: logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, origin: &FailureOrigin, error: &JobError) {
        error!(
            job_id = origin.job_id,
            name = %origin.name,
            domain = origin.domain.as_ref().map_or("-", MutexDomain::as_str),
            error = %error,
            "unhandled job failure"
        );
    }
}
