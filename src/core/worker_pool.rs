//! Worker pool with dedicated OS threads.
//!
//! The default [`Executor`](crate::core::Executor) of a scheduler. Job bodies
//! are blocking code (they may suspend on a blocking condition or sleep), so
//! they run on dedicated threads rather than on an async runtime.
//!
//! # Key Features
//!
//! - **Bounded admission**: a full queue rejects instead of blocking the caller
//! - **Panic containment**: a panicking runnable is counted, logged and the
//!   worker keeps serving
//! - **Graceful shutdown**: runnables still queued at shutdown are dropped,
//!   which the scheduler observes as rejection
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::core::{Executor, WorkerPool};
//! use prometheus_jobs::config::WorkerPoolConfig;
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new()
//!         .with_worker_count(4)
//!         .with_max_queue_depth(500),
//! )?;
//! pool.execute(Box::new(|| println!("hello from a worker")))?;
//! ```

mod native;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The task queue is full; no more tasks can be accepted.
    #[error("task queue is full")]
    QueueFull,

    /// The pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (worker thread spawn failure, channel closed, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing tasks.
    pub active_tasks: u64,

    /// Tasks waiting in the queue.
    pub queued_tasks: u64,

    /// Total tasks that ran to completion.
    pub completed_tasks: u64,

    /// Total tasks that panicked.
    pub failed_tasks: u64,

    /// Total tasks accepted.
    pub submitted_tasks: u64,

    /// Total tasks refused (queue full or shut down).
    pub rejected_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
        }
    }
}

pub use native::WorkerPool;
