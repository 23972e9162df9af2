//! The job scheduler.
//!
//! A [`Scheduler`] accepts job bodies, wraps each in a future and forwards it
//! to its [`Executor`] once it may run. Jobs that share a [`MutexDomain`] run
//! one at a time in submission order; jobs without a domain are submitted
//! immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::core::{JobInput, MutexDomain, Scheduler};
//! use prometheus_jobs::config::SchedulerConfig;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let session = MutexDomain::new("session-42");
//!
//! let first = scheduler.schedule(|_ctx| Ok(1), JobInput::new().with_domain(session.clone()));
//! let second = scheduler.schedule(|_ctx| Ok(2), JobInput::new().with_domain(session));
//! assert_eq!(first.await_done_and_get(None)? + second.await_done_and_get(None)?, 3);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, info_span, warn};

use crate::builders::SchedulerBuilder;
use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::blocking::BlockingCondition;
use crate::core::context::RunContext;
use crate::core::error::{JobError, SchedulerError, TimeoutKind};
use crate::core::exception::{ExceptionHandler, FailureOrigin};
use crate::core::executor::{Executor, Runnable};
use crate::core::expiration::ExpirationMonitor;
use crate::core::future::{CancelCause, FutureCore, FutureFilter, JobFuture, JobId, JobStatus};
use crate::core::mutex_registry::{AcquisitionKind, MutexDomain, MutexRegistry};
use crate::core::transaction::Transaction;
use crate::util::clock::{deadline_after, Clock};
use crate::util::panic_message;

type JobBody<T> = Box<dyn FnOnce(&JobContext<'_>) -> anyhow::Result<T> + Send>;

/// Submission options of one job.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    name: Option<String>,
    run_context: RunContext,
    domain: Option<MutexDomain>,
    expiration: Option<Duration>,
    log_on_error: Option<bool>,
}

impl JobInput {
    /// No name, empty run context, no domain, no expiration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Input with a job name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    /// Set the job name (defaults to `job-{id}`).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach the submitter's run context.
    #[must_use]
    pub fn with_run_context(mut self, run_context: RunContext) -> Self {
        self.run_context = run_context;
        self
    }

    /// Run mutually exclusive with other jobs of this domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<MutexDomain>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Fail with a timeout if the job has not started within `expiration`.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Override [`SchedulerConfig::log_on_error`] for this job.
    #[must_use]
    pub const fn with_log_on_error(mut self, log_on_error: bool) -> Self {
        self.log_on_error = Some(log_on_error);
        self
    }

    /// Mutex domain, if set.
    #[must_use]
    pub const fn domain(&self) -> Option<&MutexDomain> {
        self.domain.as_ref()
    }

    /// Run context.
    #[must_use]
    pub const fn run_context(&self) -> &RunContext {
        &self.run_context
    }
}

/// What a job body sees of its own execution.
pub struct JobContext<'a> {
    core: &'a Arc<FutureCore>,
    scheduler: &'a Scheduler,
    run_context: &'a RunContext,
    transaction: &'a Transaction,
}

impl JobContext<'_> {
    /// Identifier of the running job.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.core.id
    }

    /// Name of the running job.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.core.name
    }

    /// Mutex domain of the running job.
    #[must_use]
    pub fn domain(&self) -> Option<&MutexDomain> {
        self.core.domain.as_ref()
    }

    /// Run context the job was submitted with.
    #[must_use]
    pub const fn run_context(&self) -> &RunContext {
        self.run_context
    }

    /// Transaction bracketing the body; commits if the body returns `Ok`.
    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        self.transaction
    }

    /// The scheduler running this job, for follow-up submissions.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        self.scheduler
    }

    /// Whether the job was cancelled with interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.core.lock().interrupted
    }

    /// Whether the job was cancelled, with or without interruption.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.status() == JobStatus::Cancelled
    }

    /// Bail out of the body if interrupted.
    ///
    /// # Errors
    ///
    /// [`JobError::Interrupted`] once the job was cancelled with interruption.
    pub fn check_interrupted(&self) -> Result<(), JobError> {
        if self.is_interrupted() {
            Err(JobError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep, waking early on interruption. The permit stays held.
    ///
    /// # Errors
    ///
    /// [`JobError::Interrupted`] if interrupted before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), JobError> {
        let deadline = deadline_after(Some(duration));
        let mut state = self.core.lock();
        loop {
            if state.interrupted {
                return Err(JobError::Interrupted);
            }
            if self.core.wait(&mut state, deadline) {
                return if state.interrupted {
                    Err(JobError::Interrupted)
                } else {
                    Ok(())
                };
            }
        }
    }

    /// Whether the job currently holds its domain's permit.
    #[must_use]
    pub fn holds_permit(&self) -> bool {
        self.scheduler.shared.registry.is_holder(self.core)
    }

    pub(crate) const fn core(&self) -> &Arc<FutureCore> {
        self.core
    }
}

impl fmt::Debug for JobContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.core.id)
            .field("job_name", &self.core.name)
            .field("domain", &self.core.domain)
            .finish_non_exhaustive()
    }
}

/// Wrapper submitted to the executor. Dropping it unrun cancels the job as
/// rejected.
struct FutureTask<T> {
    core: Arc<FutureCore>,
    slot: Arc<Mutex<Option<T>>>,
    scheduler: Weak<SchedulerShared>,
    run_context: RunContext,
    body: Option<JobBody<T>>,
}

impl<T: Send + 'static> FutureTask<T> {
    fn into_runnable(self) -> Runnable {
        Box::new(move || self.run())
    }

    fn run(mut self) {
        let Some(body) = self.body.take() else {
            return;
        };
        match self.scheduler.upgrade() {
            Some(shared) => shared.run_job(&self.core, &self.slot, &self.run_context, body),
            None => {
                self.core.cancel_detached(CancelCause::Rejected, false);
            }
        }
    }
}

impl<T> Drop for FutureTask<T> {
    fn drop(&mut self) {
        if self.body.take().is_none() {
            return;
        }
        match self.scheduler.upgrade() {
            Some(shared) => shared.on_abandoned(&self.core),
            None => {
                self.core.cancel_detached(CancelCause::Rejected, false);
            }
        }
    }
}

enum Start {
    Run,
    Skip,
    Expired,
}

pub(crate) struct SchedulerShared {
    config: SchedulerConfig,
    executor: Arc<dyn Executor>,
    pub(crate) registry: MutexRegistry,
    tracked: Mutex<HashMap<JobId, Arc<FutureCore>>>,
    tracked_changed: Condvar,
    monitor: Arc<ExpirationMonitor>,
    pub(crate) clock: Arc<dyn Clock>,
    exception_handler: Arc<dyn ExceptionHandler>,
    audit: Option<Arc<dyn AuditSink>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl SchedulerShared {
    /// Submit granted jobs to the executor, moving the permit on for every
    /// rejection.
    pub(crate) fn dispatch(self: &Arc<Self>, next: Option<Arc<FutureCore>>) {
        let mut next = next;
        while let Some(core) = next.take() {
            let Some(runnable) = core.take_runnable() else {
                continue;
            };
            debug!(job_id = core.id, domain = core.domain_name(), "submitting job to executor");
            if let Err(rejected) = self.executor.execute(runnable) {
                warn!(job_id = core.id, reason = rejected.reason(), "executor rejected job");
                next = self.reject(&core, rejected.reason());
                drop(rejected);
            }
        }
    }

    fn reject(self: &Arc<Self>, core: &Arc<FutureCore>, reason: &str) -> Option<Arc<FutureCore>> {
        if core.cancel_detached(CancelCause::Rejected, false) {
            self.notify_tracked();
            self.audit(core, AuditAction::Rejected, Some(reason.to_string()));
        }
        let next = self.registry.release(core);
        self.finalize(core);
        next
    }

    /// The wrapper of `core` was dropped without running.
    fn on_abandoned(self: &Arc<Self>, core: &Arc<FutureCore>) {
        if core.cancel_detached(CancelCause::Rejected, false) {
            warn!(job_id = core.id, "job dropped without running");
            self.notify_tracked();
            self.audit(core, AuditAction::Rejected, None);
        }
        self.relinquish(core);
    }

    fn relinquish(self: &Arc<Self>, core: &Arc<FutureCore>) {
        let next = self.registry.release(core);
        self.dispatch(next);
        self.finalize(core);
    }

    fn finalize(&self, core: &FutureCore) {
        {
            let mut state = core.lock();
            if state.finished {
                return;
            }
            state.finished = true;
        }
        let mut tracked = self.tracked.lock();
        tracked.remove(&core.id);
        self.tracked_changed.notify_all();
    }

    fn notify_tracked(&self) {
        let _tracked = self.tracked.lock();
        self.tracked_changed.notify_all();
    }

    pub(crate) fn audit(&self, core: &FutureCore, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_audit_event(
                core.id,
                core.name.clone(),
                core.domain_name().map(str::to_string),
                action,
                detail,
            ));
        }
    }

    pub(crate) fn report_failure(&self, origin: &FailureOrigin, error: &JobError) {
        self.exception_handler.handle(origin, error);
    }

    fn begin(self: &Arc<Self>, core: &Arc<FutureCore>) -> bool {
        let now = self.clock.now();
        let start = {
            let mut state = core.lock();
            if state.status.is_terminal() {
                Start::Skip
            } else if core.expires_at.is_some_and(|deadline| now >= deadline) {
                state.status = JobStatus::Failed;
                state.error = Some(JobError::Timeout(TimeoutKind::Expired));
                Start::Expired
            } else {
                state.status = JobStatus::Running;
                state.started = true;
                state.worker = Some(thread::current().id());
                Start::Run
            }
        };
        match start {
            Start::Run => true,
            Start::Skip => {
                self.relinquish(core);
                false
            }
            Start::Expired => {
                core.notify();
                self.notify_tracked();
                info!(job_id = core.id, "job expired before start");
                self.audit(core, AuditAction::Expired, None);
                self.relinquish(core);
                false
            }
        }
    }

    fn run_job<T>(
        self: &Arc<Self>,
        core: &Arc<FutureCore>,
        slot: &Mutex<Option<T>>,
        run_context: &RunContext,
        body: JobBody<T>,
    ) {
        if !self.begin(core) {
            return;
        }

        let span = info_span!(
            "job",
            job_id = core.id,
            job = %core.name,
            domain = core.domain_name().unwrap_or("-"),
        );
        let _entered = span.enter();
        debug!("job started");
        self.audit(core, AuditAction::Started, None);

        let scheduler = Scheduler {
            shared: Arc::clone(self),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_context.call(|transaction| {
                let ctx = JobContext {
                    core,
                    scheduler: &scheduler,
                    run_context,
                    transaction,
                };
                body(&ctx)
            })
        }));
        let result = outcome.unwrap_or_else(|payload| {
            Err(anyhow!("job panicked: {}", panic_message(payload.as_ref())))
        });
        drop(scheduler);

        self.complete(core, slot, result);
    }

    fn complete<T>(
        self: &Arc<Self>,
        core: &Arc<FutureCore>,
        slot: &Mutex<Option<T>>,
        result: anyhow::Result<T>,
    ) {
        let failure = match result {
            Ok(value) => {
                *slot.lock() = Some(value);
                None
            }
            Err(err) => Some(JobError::task_failed(err)),
        };

        let (status, report) = {
            let mut state = core.lock();
            state.worker = None;
            if !state.status.is_terminal() {
                match &failure {
                    None => state.status = JobStatus::Done,
                    Some(err) => {
                        state.status = JobStatus::Failed;
                        state.error = Some(err.clone());
                    }
                }
            }
            let report = state.status == JobStatus::Failed && core.log_on_error && state.awaiting == 0;
            (state.status, report)
        };
        core.notify();
        self.notify_tracked();

        match (&failure, status) {
            (None, JobStatus::Done) => {
                debug!("job completed");
                self.audit(core, AuditAction::Completed, None);
            }
            (Some(err), JobStatus::Failed) => {
                debug!(error = %err, "job failed");
                self.audit(core, AuditAction::Failed, Some(err.to_string()));
                if report {
                    let origin = FailureOrigin {
                        job_id: Some(core.id),
                        name: core.name.clone(),
                        domain: core.domain.clone(),
                    };
                    self.exception_handler.handle(&origin, err);
                }
            }
            _ => debug!(status = ?status, "job body returned after cancellation"),
        }

        self.relinquish(core);
    }

    pub(crate) fn cancel_future(self: &Arc<Self>, core: &Arc<FutureCore>, interrupt: bool) -> bool {
        let (started, suspended_on) = {
            let mut state = core.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = JobStatus::Cancelled;
            state.cancel_cause = Some(CancelCause::Requested);
            state.interrupted |= interrupt;
            (state.started, state.blocked_on.clone())
        };
        core.notify();
        self.notify_tracked();
        info!(job_id = core.id, interrupt = interrupt, started = started, "job cancelled");
        self.audit(core, AuditAction::Cancelled, None);

        if !started {
            let next = self.registry.withdraw(core);
            self.dispatch(next);
            drop(core.take_runnable());
            self.finalize(core);
        } else if let Some(condition) = suspended_on {
            // Suspended in wait_for: leave the condition, or the domain queue
            // if it was already released.
            let waiting = condition.upgrade().is_some_and(|c| c.remove_waiter(core));
            if !waiting {
                let next = self.registry.withdraw(core);
                self.dispatch(next);
            }
        }
        true
    }

    fn expire(self: &Arc<Self>, core: &Arc<FutureCore>) -> bool {
        {
            let mut state = core.lock();
            if state.status.is_terminal() || state.started {
                return false;
            }
            state.status = JobStatus::Failed;
            state.error = Some(JobError::Timeout(TimeoutKind::Expired));
        }
        core.notify();
        self.notify_tracked();
        info!(job_id = core.id, domain = core.domain_name(), "job expired before start");
        self.audit(core, AuditAction::Expired, None);

        let next = self.registry.withdraw(core);
        self.dispatch(next);
        drop(core.take_runnable());
        self.finalize(core);
        true
    }

    fn expire_overdue(self: &Arc<Self>) -> usize {
        let now = self.clock.now();
        let mut expired = 0;
        for job_id in self.monitor.take_due(now) {
            let core = self.tracked.lock().get(&job_id).cloned();
            if let Some(core) = core {
                if core.expires_at.is_some_and(|deadline| deadline <= now) && self.expire(&core) {
                    expired += 1;
                }
            }
        }
        expired
    }

    /// Time until the monitor should look again.
    fn next_sweep_in(&self) -> Duration {
        let tick = self.config.expiration_tick();
        self.monitor
            .next_deadline()
            .map_or(tick, |deadline| deadline.saturating_duration_since(self.clock.now()).min(tick))
    }

    fn matching(&self, filter: &FutureFilter) -> Vec<Arc<FutureCore>> {
        self.tracked
            .lock()
            .values()
            .filter(|core| filter.matches(core))
            .cloned()
            .collect()
    }
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        self.monitor.shutdown();
    }
}

/// Handle to a job scheduler. Cheap to clone; clones share the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) shared: Arc<SchedulerShared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tracked_jobs", &self.shared.tracked.lock().len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Scheduler backed by a worker pool built from `config`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the worker pool cannot start.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new(config).build()
    }

    /// Builder for schedulers with custom executor, clock, exception handler
    /// or audit sink.
    #[must_use]
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
        exception_handler: Arc<dyn ExceptionHandler>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, SchedulerError> {
        let monitor = Arc::new(ExpirationMonitor::new());
        let shared = Arc::new(SchedulerShared {
            config,
            executor,
            registry: MutexRegistry::new(),
            tracked: Mutex::new(HashMap::new()),
            tracked_changed: Condvar::new(),
            monitor: Arc::clone(&monitor),
            clock,
            exception_handler,
            audit,
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        ExpirationMonitor::spawn(monitor, move || {
            let shared = weak.upgrade()?;
            shared.expire_overdue();
            Some(shared.next_sweep_in())
        })
        .map_err(|e| SchedulerError::Executor(format!("failed to start expiration monitor: {e}")))?;

        info!("scheduler started");
        Ok(Self { shared })
    }

    /// Configuration the scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Submit a job.
    ///
    /// Without a domain the job goes to the executor right away. With a
    /// domain it queues behind the domain's other jobs and is submitted once
    /// it is granted the permit. After [`Scheduler::shutdown`] the returned
    /// future is already cancelled as rejected.
    pub fn schedule<T, F>(&self, task: F, input: JobInput) -> JobFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobContext<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let JobInput {
            name,
            run_context,
            domain,
            expiration,
            log_on_error,
        } = input;
        let name = name.unwrap_or_else(|| format!("job-{id}"));
        let expires_at = expiration.and_then(|e| shared.clock.now().checked_add(e));
        let core = Arc::new(FutureCore::new(
            id,
            name,
            domain,
            expires_at,
            log_on_error.unwrap_or(shared.config.log_on_error),
        ));
        let slot = Arc::new(Mutex::new(None));

        let task = FutureTask {
            core: Arc::clone(&core),
            slot: Arc::clone(&slot),
            scheduler: Arc::downgrade(shared),
            run_context,
            body: Some(Box::new(task)),
        };
        core.set_runnable(task.into_runnable());
        shared.tracked.lock().insert(id, Arc::clone(&core));

        debug!(job_id = id, job = %core.name, domain = core.domain_name(), "job scheduled");
        shared.audit(&core, AuditAction::Scheduled, None);
        if let Some(deadline) = expires_at {
            shared.monitor.register(deadline, id);
        }

        if shared.shut_down.load(Ordering::Acquire) {
            drop(core.take_runnable());
        } else if core.domain.is_some() {
            core.set_live_status(JobStatus::Queued);
            let next = shared
                .registry
                .acquire(&core, AcquisitionKind::Start, shared.clock.now());
            shared.dispatch(next);
        } else {
            shared.dispatch(Some(Arc::clone(&core)));
        }

        JobFuture {
            core,
            slot,
            scheduler: Arc::downgrade(shared),
        }
    }

    /// Jobs queued in or holding `domain`.
    #[must_use]
    pub fn permit_count(&self, domain: &MutexDomain) -> usize {
        self.shared.registry.permit_count(domain)
    }

    /// New blocking condition bound to this scheduler.
    #[must_use]
    pub fn create_blocking_condition(&self, name: impl Into<String>, blocking: bool) -> BlockingCondition {
        BlockingCondition::new(name.into(), blocking, Arc::downgrade(&self.shared))
    }

    /// Whether every job matching `filter` is final.
    #[must_use]
    pub fn is_done(&self, filter: &FutureFilter) -> bool {
        let tracked = self.shared.tracked.lock();
        all_terminal(&tracked, filter)
    }

    /// Wait until every job matching `filter` is final. Returns `false` if
    /// `timeout` elapsed first.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AwaitWhileHoldingPermit`] when called from a job body
    /// that holds a mutex permit, which could otherwise deadlock.
    pub fn await_done(&self, filter: &FutureFilter, timeout: Option<Duration>) -> Result<bool, SchedulerError> {
        self.ensure_not_holding_permit()?;
        Ok(self.wait_tracked(timeout, |tracked| all_terminal(tracked, filter)))
    }

    /// Like [`Scheduler::await_done`] but also waits until the matching jobs'
    /// bodies have returned and their permits were handed on.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::await_done`].
    pub fn await_finished(&self, filter: &FutureFilter, timeout: Option<Duration>) -> Result<bool, SchedulerError> {
        self.ensure_not_holding_permit()?;
        Ok(self.wait_tracked(timeout, |tracked| {
            !tracked.values().any(|core| filter.matches(core))
        }))
    }

    /// Cancel every job matching `filter`. Returns how many were cancelled
    /// by this call.
    pub fn cancel(&self, filter: &FutureFilter, interrupt: bool) -> usize {
        self.shared
            .matching(filter)
            .iter()
            .filter(|core| self.shared.cancel_future(core, interrupt))
            .count()
    }

    /// Expire jobs whose deadline passed according to the scheduler's clock.
    /// The expiration monitor calls this periodically; tests driving a
    /// manual clock call it directly. Returns how many jobs expired.
    pub fn expire_overdue(&self) -> usize {
        self.shared.expire_overdue()
    }

    /// Cancel all jobs with interruption, stop the executor and the
    /// expiration monitor. Later submissions are rejected.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down scheduler");
        let cancelled = self.cancel(&FutureFilter::all(), true);
        self.shared.executor.shutdown();
        self.shared.monitor.shutdown();
        info!(cancelled = cancelled, "scheduler shut down");
    }

    /// Whether [`Scheduler::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    pub(crate) const fn shared(&self) -> &Arc<SchedulerShared> {
        &self.shared
    }

    fn ensure_not_holding_permit(&self) -> Result<(), SchedulerError> {
        let me = thread::current().id();
        let running_here: Vec<_> = self
            .shared
            .tracked
            .lock()
            .values()
            .filter(|core| core.lock().worker == Some(me))
            .cloned()
            .collect();
        for core in running_here {
            if self.shared.registry.is_holder(&core) {
                let domain = core.domain_name().unwrap_or_default().to_string();
                return Err(SchedulerError::AwaitWhileHoldingPermit(domain));
            }
        }
        Ok(())
    }

    fn wait_tracked<P>(&self, timeout: Option<Duration>, mut done: P) -> bool
    where
        P: FnMut(&HashMap<JobId, Arc<FutureCore>>) -> bool,
    {
        let deadline = deadline_after(timeout);
        let mut tracked = self.shared.tracked.lock();
        loop {
            if done(&tracked) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.tracked_changed.wait_until(&mut tracked, deadline).timed_out() {
                        return done(&tracked);
                    }
                }
                None => self.shared.tracked_changed.wait(&mut tracked),
            }
        }
    }
}

fn all_terminal(tracked: &HashMap<JobId, Arc<FutureCore>>, filter: &FutureFilter) -> bool {
    tracked
        .values()
        .filter(|core| filter.matches(core))
        .all(|core| core.status().is_terminal())
}
