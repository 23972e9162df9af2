//! # Prometheus Jobs
//!
//! A job scheduler that serializes work per mutex domain on top of a
//! pluggable executor.
//!
//! Callers submit job bodies to a [`core::Scheduler`] and get back a
//! [`core::JobFuture`] to observe or cancel them. Jobs that share a
//! [`core::MutexDomain`] run one at a time in submission order, while jobs
//! from different domains run in parallel on the executor's threads.
//!
//! ## Key Features
//!
//! - **Mutex Domains**: FIFO permit per domain, handed on when the holder
//!   finishes, fails, is cancelled or is rejected
//! - **Blocking Conditions**: a running job can park on a
//!   [`core::BlockingCondition`], giving up its permit until the condition
//!   is released, then requeue for it
//! - **Cancellation, Rejection and Expiration**: every way a job can end
//!   settles its future and moves the domain on
//! - **Deferred Operation Queue**: transactional batching of many small
//!   additions into few consumer calls
//! - **Worker Thread Pool**: dedicated OS threads by default, or tokio's
//!   blocking pool behind the `tokio-runtime` feature
//!
//! ## Scheduling jobs
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_jobs::config::SchedulerConfig;
//! use prometheus_jobs::core::{JobInput, Scheduler};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::from_env()?)?;
//! let input = JobInput::named("rebuild-index")
//!     .with_domain("tenant-7")
//!     .with_expiration(Duration::from_secs(30));
//! let future = scheduler.schedule(|ctx| {
//!     ctx.check_interrupted()?;
//!     Ok(42)
//! }, input);
//! assert_eq!(future.await_done_and_get(Some(Duration::from_secs(60)))?, 42);
//! ```
//!
//! ## Batching additions
//!
//! ```rust,ignore
//! use prometheus_jobs::config::DeferredQueueConfig;
//! use prometheus_jobs::infra::queue::DeferredOperationQueue;
//!
//! let queue = DeferredOperationQueue::new(
//!     &scheduler,
//!     "audit-writes",
//!     DeferredQueueConfig::default(),
//!     |batch: Vec<String>, _tx: &_| store.insert_many(batch),
//! )?;
//! queue.add("row".to_string());
//! queue.flush();
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduler, futures, mutex domains and blocking conditions.
pub mod core;
/// Configuration models for the scheduler, worker pool and queues.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Infrastructure built on the scheduler, such as batching queues.
pub mod infra;
/// Runtime adapters for executing jobs on an async runtime.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;
