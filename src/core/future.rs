//! Job futures: the shared lifecycle state of one submitted job and the
//! typed handle callers hold on to.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::core::blocking::ConditionInner;
use crate::core::error::{JobError, TimeoutKind};
use crate::core::executor::Runnable;
use crate::core::mutex_registry::MutexDomain;
use crate::core::scheduler::SchedulerShared;
use crate::util::clock::deadline_after;

/// Identifier of a job, unique per scheduler.
pub type JobId = u64;

/// Lifecycle state of a job.
///
/// `Created → Queued → Running → (Blocked → Queued → Running)* → Done | Failed | Cancelled`.
/// Jobs without a mutex domain go from `Created` straight to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, not yet handed to the executor.
    Created,
    /// Waiting in its domain queue for the permit.
    Queued,
    /// Body executing (holding the permit if the job has a domain).
    Running,
    /// Suspended on a blocking condition, permit released.
    Blocked,
    /// Body returned `Ok`.
    Done,
    /// Body returned `Err`, panicked, or the job expired before start.
    Failed,
    /// Cancelled on request or rejected by the executor.
    Cancelled,
}

impl JobStatus {
    /// Whether the job reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Why a job was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// `cancel` was called on the job or a filter matching it.
    Requested,
    /// The executor refused the job, or it was dropped unrun.
    Rejected,
}

pub(crate) struct CoreState {
    pub status: JobStatus,
    pub started: bool,
    pub interrupted: bool,
    pub cancel_cause: Option<CancelCause>,
    pub error: Option<JobError>,
    /// Set by the registry when a job released from a blocking condition
    /// gets its permit back.
    pub resume_granted: bool,
    /// Callers currently blocked waiting for the outcome.
    pub awaiting: usize,
    /// Condition the job is suspended on, until it resumes or gives up.
    pub blocked_on: Option<Weak<ConditionInner>>,
    /// Permit bookkeeping done and the job dropped from the scheduler.
    pub finished: bool,
    pub worker: Option<ThreadId>,
}

/// Type-erased state shared by the scheduler, the registry, blocking
/// conditions and every handle of one job.
pub(crate) struct FutureCore {
    pub id: JobId,
    pub name: String,
    pub domain: Option<MutexDomain>,
    pub expires_at: Option<Instant>,
    pub log_on_error: bool,
    state: Mutex<CoreState>,
    changed: Condvar,
    runnable: Mutex<Option<Runnable>>,
}

impl FutureCore {
    pub fn new(
        id: JobId,
        name: String,
        domain: Option<MutexDomain>,
        expires_at: Option<Instant>,
        log_on_error: bool,
    ) -> Self {
        Self {
            id,
            name,
            domain,
            expires_at,
            log_on_error,
            state: Mutex::new(CoreState {
                status: JobStatus::Created,
                started: false,
                interrupted: false,
                cancel_cause: None,
                error: None,
                resume_granted: false,
                awaiting: 0,
                blocked_on: None,
                finished: false,
                worker: None,
            }),
            changed: Condvar::new(),
            runnable: Mutex::new(None),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock()
    }

    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Wait for a state change. Returns `true` when the deadline elapsed.
    pub fn wait(&self, state: &mut MutexGuard<'_, CoreState>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.changed.wait_until(state, deadline).timed_out(),
            None => {
                self.changed.wait(state);
                false
            }
        }
    }

    pub fn set_runnable(&self, runnable: Runnable) {
        *self.runnable.lock() = Some(runnable);
    }

    pub fn take_runnable(&self) -> Option<Runnable> {
        self.runnable.lock().take()
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain.as_ref().map(MutexDomain::as_str)
    }

    /// Move to a non-terminal status unless the job already finished.
    pub fn set_live_status(&self, status: JobStatus) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = status;
        }
    }

    pub fn grant_resume(&self) {
        self.state.lock().resume_granted = true;
        self.changed.notify_all();
    }

    pub fn revoke_resume(&self) {
        self.state.lock().resume_granted = false;
    }

    /// Mark cancelled without scheduler involvement. Used when the scheduler
    /// is already gone.
    pub fn cancel_detached(&self, cause: CancelCause, interrupt: bool) -> bool {
        let cancelled = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                false
            } else {
                state.status = JobStatus::Cancelled;
                state.cancel_cause = Some(cause);
                state.interrupted |= interrupt;
                true
            }
        };
        self.notify();
        cancelled
    }

    /// Block until the job is terminal. Returns `false` on timeout.
    pub fn await_terminal(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        state.awaiting += 1;
        let mut terminal = state.status.is_terminal();
        while !terminal {
            let timed_out = self.wait(&mut state, deadline);
            terminal = state.status.is_terminal();
            if timed_out {
                break;
            }
        }
        state.awaiting -= 1;
        terminal
    }

    /// Outcome of a terminal job, without the value.
    pub fn outcome(&self) -> Result<(), JobError> {
        let state = self.state.lock();
        match state.status {
            JobStatus::Done => Ok(()),
            JobStatus::Failed => Err(state.error.clone().unwrap_or(JobError::Cancelled)),
            JobStatus::Cancelled => Err(JobError::Cancelled),
            _ => Err(JobError::Timeout(TimeoutKind::Await)),
        }
    }
}

impl fmt::Debug for FutureCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Handle to a scheduled job and its eventual result.
///
/// Cheap to clone; all clones observe the same job.
pub struct JobFuture<T> {
    pub(crate) core: Arc<FutureCore>,
    pub(crate) slot: Arc<Mutex<Option<T>>>,
    pub(crate) scheduler: Weak<SchedulerShared>,
}

impl<T> Clone for JobFuture<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            slot: Arc::clone(&self.slot),
            scheduler: Weak::clone(&self.scheduler),
        }
    }
}

impl<T> fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobFuture").field(&self.core).finish()
    }
}

impl<T> JobFuture<T> {
    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.core.id
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Mutex domain, if the job was submitted with one.
    #[must_use]
    pub fn domain(&self) -> Option<&MutexDomain> {
        self.core.domain.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.core.status()
    }

    /// Whether the job reached a final state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Whether the job was cancelled (including rejection).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    /// Whether the job is suspended on a blocking condition.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status() == JobStatus::Blocked
    }

    /// Why the job was cancelled, if it was.
    #[must_use]
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.core.lock().cancel_cause
    }

    /// Cancel the job.
    ///
    /// A job that has not started is withdrawn and never runs. A running job
    /// keeps its permit until its body returns; with `interrupt` its
    /// interruption flag is raised and any [`wait_for`] or
    /// [`JobContext::sleep`] it is suspended in fails with
    /// [`JobError::Interrupted`]. Without `interrupt` a job suspended in
    /// [`wait_for`], or queued to get its permit back after one, is removed
    /// from the condition and the domain queue and its `wait_for` fails with
    /// [`JobError::Cancelled`].
    ///
    /// Returns `true` only for the call that caused the cancellation.
    ///
    /// [`wait_for`]: crate::core::BlockingCondition::wait_for
    /// [`JobContext::sleep`]: crate::core::JobContext::sleep
    pub fn cancel(&self, interrupt: bool) -> bool {
        match self.scheduler.upgrade() {
            Some(shared) => shared.cancel_future(&self.core, interrupt),
            None => self.core.cancel_detached(CancelCause::Requested, interrupt),
        }
    }

    /// Wait until the job is final. Returns `false` if `timeout` elapsed first.
    #[must_use]
    pub fn await_done(&self, timeout: Option<Duration>) -> bool {
        self.core.await_terminal(timeout)
    }
}

impl<T: Clone> JobFuture<T> {
    /// Wait for the job and return its result.
    ///
    /// # Errors
    ///
    /// - [`JobError::Timeout`] with [`TimeoutKind::Await`] if `timeout` elapsed
    /// - [`JobError::Cancelled`] if the job was cancelled or rejected
    /// - the job's own failure otherwise
    pub fn await_done_and_get(&self, timeout: Option<Duration>) -> Result<T, JobError> {
        if !self.await_done(timeout) {
            return Err(JobError::Timeout(TimeoutKind::Await));
        }
        self.core.outcome()?;
        self.slot.lock().clone().ok_or(JobError::Cancelled)
    }
}

#[cfg(feature = "tokio-runtime")]
impl<T: Clone + Send + 'static> JobFuture<T> {
    /// [`JobFuture::await_done_and_get`] for callers on a tokio runtime; the
    /// wait happens on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`JobFuture::await_done_and_get`].
    pub async fn await_done_and_get_async(&self, timeout: Duration) -> Result<T, JobError> {
        let future = self.clone();
        tokio::task::spawn_blocking(move || future.await_done_and_get(Some(timeout)))
            .await
            .unwrap_or(Err(JobError::Cancelled))
    }
}

/// Selects jobs for [`Scheduler`] queries. An empty filter matches every job.
///
/// [`Scheduler`]: crate::core::Scheduler
#[derive(Debug, Clone, Default)]
pub struct FutureFilter {
    domain: Option<MutexDomain>,
    ids: Option<HashSet<JobId>>,
    name: Option<String>,
}

impl FutureFilter {
    /// Match every job.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the given job only.
    #[must_use]
    pub fn future<T>(future: &JobFuture<T>) -> Self {
        Self::all().with_ids([future.id()])
    }

    /// Restrict to one mutex domain.
    #[must_use]
    pub fn with_domain(mut self, domain: MutexDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Restrict to the given job ids.
    #[must_use]
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    /// Restrict to jobs with this name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn matches(&self, core: &FutureCore) -> bool {
        if let Some(domain) = &self.domain {
            if core.domain.as_ref() != Some(domain) {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&core.id) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &core.name != name {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(id: JobId, domain: Option<&str>) -> FutureCore {
        FutureCore::new(id, format!("job-{id}"), domain.map(MutexDomain::new), None, true)
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Blocked.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn live_status_does_not_leave_terminal() {
        let core = core(1, None);
        assert!(core.cancel_detached(CancelCause::Requested, false));
        core.set_live_status(JobStatus::Running);
        assert_eq!(core.status(), JobStatus::Cancelled);
        assert!(!core.cancel_detached(CancelCause::Requested, true));
    }

    #[test]
    fn await_terminal_times_out() {
        let core = core(1, None);
        assert!(!core.await_terminal(Some(Duration::from_millis(20))));
        assert_eq!(core.lock().awaiting, 0);
    }

    #[test]
    fn filter_matching() {
        let a = core(1, Some("session-a"));
        let b = core(2, Some("session-b"));
        let filter = FutureFilter::all().with_domain(MutexDomain::new("session-a"));
        assert!(filter.matches(&a));
        assert!(!filter.matches(&b));
        assert!(FutureFilter::all().with_ids([2]).matches(&b));
        assert!(FutureFilter::all().with_name("job-1").matches(&a));
        assert!(FutureFilter::all().matches(&b));
    }
}
