//! Core scheduling abstractions: futures, mutex domains, blocking conditions
//! and the scheduler that ties them to an executor.

pub mod audit;
pub mod blocking;
pub mod context;
pub mod error;
pub mod exception;
pub mod executor;
mod expiration;
pub mod future;
pub mod mutex_registry;
pub mod scheduler;
pub mod transaction;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use blocking::BlockingCondition;
pub use context::RunContext;
pub use error::{JobError, SchedulerError, TimeoutKind};
pub use exception::{ExceptionHandler, FailureOrigin, LoggingExceptionHandler};
pub use executor::{Executor, ExecutorFactory, Rejected, Runnable, SharedExecutorFactory, WorkerPoolFactory};
pub use future::{CancelCause, FutureFilter, JobFuture, JobId, JobStatus};
pub use mutex_registry::MutexDomain;
pub use scheduler::{JobContext, JobInput, Scheduler};
pub use transaction::{Transaction, TransactionId, TransactionMember};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
