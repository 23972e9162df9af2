//! Builder to construct a scheduler from configuration and pluggable parts.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    AuditSink, ExceptionHandler, Executor, ExecutorFactory, LoggingExceptionHandler, Scheduler,
    SchedulerError, SharedExecutorFactory, WorkerPoolFactory,
};
use crate::util::clock::{Clock, SystemClock};

/// Assembles a [`Scheduler`].
///
/// Defaults: a [`WorkerPool`](crate::core::WorkerPool) sized by
/// [`SchedulerConfig::worker_pool`], the system clock, a logging exception
/// handler and no audit sink.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    executor_factory: Box<dyn ExecutorFactory>,
    clock: Arc<dyn Clock>,
    exception_handler: Arc<dyn ExceptionHandler>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Builder with default parts.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            executor_factory: Box::new(WorkerPoolFactory),
            clock: Arc::new(SystemClock),
            exception_handler: Arc::new(LoggingExceptionHandler),
            audit: None,
        }
    }

    /// Configuration being built.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Create the executor with `factory`.
    #[must_use]
    pub fn executor_factory(mut self, factory: impl ExecutorFactory + 'static) -> Self {
        self.executor_factory = Box::new(factory);
        self
    }

    /// Use an existing executor.
    #[must_use]
    pub fn executor(self, executor: Arc<dyn Executor>) -> Self {
        self.executor_factory(SharedExecutorFactory(executor))
    }

    /// Measure expiration deadlines with `clock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route unobserved failures to `handler`.
    #[must_use]
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    /// Record job lifecycle events in `sink`.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate the configuration, create the executor and start the
    /// scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] or [`SchedulerError::Executor`].
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate().map_err(SchedulerError::InvalidConfig)?;
        let executor = self.executor_factory.create(&self.config)?;
        Scheduler::from_parts(
            self.config,
            executor,
            self.clock,
            self.exception_handler,
            self.audit,
        )
    }
}
