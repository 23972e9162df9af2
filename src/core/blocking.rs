//! Blocking conditions: gates a job can wait on without holding its permit.
//!
//! While a condition is blocking, [`BlockingCondition::wait_for`] suspends the
//! calling job and hands its domain permit to the next queued job. Once the
//! condition is released the job queues for the permit again and only
//! returns from `wait_for` after it got it back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::audit::AuditAction;
use crate::core::error::{JobError, TimeoutKind};
use crate::core::future::{FutureCore, JobStatus};
use crate::core::mutex_registry::AcquisitionKind;
use crate::core::scheduler::{JobContext, SchedulerShared};
use crate::util::clock::deadline_after;

struct ConditionState {
    blocking: bool,
    waiters: VecDeque<Arc<FutureCore>>,
}

pub(crate) struct ConditionInner {
    name: String,
    state: Mutex<ConditionState>,
    scheduler: Weak<SchedulerShared>,
}

impl ConditionInner {
    /// Take `core` out of the waiters. Returns whether it was still waiting.
    pub(crate) fn remove_waiter(&self, core: &Arc<FutureCore>) -> bool {
        let mut state = self.state.lock();
        match state.waiters.iter().position(|w| Arc::ptr_eq(w, core)) {
            Some(pos) => {
                state.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// A named, reusable gate. Clones share the same condition.
#[derive(Clone)]
pub struct BlockingCondition {
    inner: Arc<ConditionInner>,
}

impl fmt::Debug for BlockingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BlockingCondition")
            .field("name", &self.inner.name)
            .field("blocking", &state.blocking)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl BlockingCondition {
    pub(crate) fn new(name: String, blocking: bool, scheduler: Weak<SchedulerShared>) -> Self {
        Self {
            inner: Arc::new(ConditionInner {
                name,
                state: Mutex::new(ConditionState {
                    blocking,
                    waiters: VecDeque::new(),
                }),
                scheduler,
            }),
        }
    }

    /// Name given at creation.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether waits currently suspend.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.inner.state.lock().blocking
    }

    /// Jobs currently suspended on this condition.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Set the flag. Clearing it releases every waiter: each re-enters its
    /// domain queue (in no particular order relative to the others) and
    /// resumes once it holds the permit again.
    ///
    /// May be called from any job or from outside the scheduler.
    pub fn set_blocking(&self, blocking: bool) {
        let shared = self.inner.scheduler.upgrade();
        let mut starts = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.blocking == blocking {
                return;
            }
            state.blocking = blocking;
            if blocking {
                return;
            }
            let waiters = std::mem::take(&mut state.waiters);
            debug!(condition = %self.inner.name, released = waiters.len(), "blocking condition released");
            for core in waiters {
                core.set_live_status(JobStatus::Queued);
                match (&shared, core.domain.is_some()) {
                    (Some(shared), true) => {
                        starts.extend(shared.registry.acquire(
                            &core,
                            AcquisitionKind::Resume,
                            shared.clock.now(),
                        ));
                    }
                    _ => core.grant_resume(),
                }
            }
        }
        if let Some(shared) = shared {
            for core in starts {
                shared.dispatch(Some(core));
            }
        }
    }

    /// Suspend the calling job while the condition is blocking.
    ///
    /// Returns immediately, keeping the permit, when the condition is not
    /// blocking. Otherwise releases the permit to the next queued job and
    /// waits for [`set_blocking(false)`](Self::set_blocking); the call
    /// returns once the permit was re-acquired. Expiration does not apply to
    /// the re-acquisition.
    ///
    /// # Errors
    ///
    /// - [`JobError::Interrupted`] if the job is cancelled with interruption;
    ///   the permit is not re-acquired
    /// - [`JobError::Cancelled`] if the job is cancelled without interruption
    ///   before or while waiting; a job cancelled while suspended leaves the
    ///   condition and its domain queue without re-acquiring the permit
    /// - [`JobError::Timeout`] with [`TimeoutKind::WaitFor`] if `timeout`
    ///   elapses first; the job continues without the permit
    pub fn wait_for(&self, ctx: &JobContext<'_>, timeout: Option<Duration>) -> Result<(), JobError> {
        let core = ctx.core();
        let shared = ctx.scheduler().shared();

        let next = {
            let mut state = self.inner.state.lock();
            if !state.blocking {
                return Ok(());
            }
            {
                let mut job = core.lock();
                if job.interrupted {
                    return Err(JobError::Interrupted);
                }
                if job.status == JobStatus::Cancelled {
                    return Err(JobError::Cancelled);
                }
                job.resume_granted = false;
                job.blocked_on = Some(Arc::downgrade(&self.inner));
                if !job.status.is_terminal() {
                    job.status = JobStatus::Blocked;
                }
            }
            state.waiters.push_back(Arc::clone(core));
            shared.registry.release(core)
        };
        shared.dispatch(next);
        debug!(job_id = core.id, condition = %self.inner.name, "job blocked on condition");
        shared.audit(core, AuditAction::Blocked, Some(self.inner.name.clone()));

        let deadline = deadline_after(timeout);
        let failure = {
            let mut job = core.lock();
            loop {
                if job.interrupted {
                    break JobError::Interrupted;
                }
                if job.status == JobStatus::Cancelled {
                    break JobError::Cancelled;
                }
                if job.resume_granted {
                    job.resume_granted = false;
                    job.blocked_on = None;
                    if !job.status.is_terminal() {
                        job.status = JobStatus::Running;
                    }
                    drop(job);
                    debug!(job_id = core.id, condition = %self.inner.name, "job resumed");
                    shared.audit(core, AuditAction::Resumed, Some(self.inner.name.clone()));
                    return Ok(());
                }
                if core.wait(&mut job, deadline)
                    && !job.resume_granted
                    && !job.interrupted
                    && job.status != JobStatus::Cancelled
                {
                    break JobError::Timeout(TimeoutKind::WaitFor);
                }
            }
        };

        self.abandon(core, shared);
        debug!(job_id = core.id, condition = %self.inner.name, error = %failure, "job left condition without permit");
        Err(failure)
    }

    /// Drop out of the condition after a cancellation or timeout, giving
    /// back a permit that may have been granted meanwhile.
    fn abandon(&self, core: &Arc<FutureCore>, shared: &Arc<SchedulerShared>) {
        if !self.inner.remove_waiter(core) {
            let next = shared.registry.withdraw(core);
            shared.dispatch(next);
        }
        let mut job = core.lock();
        job.resume_granted = false;
        job.blocked_on = None;
        if !job.status.is_terminal() {
            job.status = JobStatus::Running;
        }
    }
}
