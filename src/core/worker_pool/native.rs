//! Native implementation of `WorkerPool` using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on the channel until work arrives
//! - **Clean shutdown**: dropping the sender unblocks idle workers naturally
//! - **Non-blocking admission**: `try_send` so the scheduler never waits for
//!   capacity while it holds a permit decision

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{Executor, Rejected, Runnable};
use crate::util::panic_message;

use super::{PoolCounters, PoolError, PoolStats};

/// Worker pool with dedicated OS threads.
pub struct WorkerPool {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Task sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<Runnable>>>,

    /// Pool statistics counters.
    counters: Arc<PoolCounters>,

    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool, spawning `config.worker_count` threads.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid and
    /// `PoolError::Internal` if a worker thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<Runnable>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let spawned = spawn_worker(
                worker_id,
                &config,
                task_rx.clone(),
                Arc::clone(&counters),
                Arc::clone(&shutdown),
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Unblock the workers already started before bailing out.
                    shutdown.store(true, Ordering::Release);
                    drop(task_tx);
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            config,
            task_tx: Mutex::new(Some(task_tx)),
            counters,
            shutdown,
            workers: Mutex::new(workers),
        })
    }

    /// Submit a runnable without blocking.
    ///
    /// # Errors
    ///
    /// Hands the runnable back with `PoolError::QueueFull` or
    /// `PoolError::PoolShutdown`.
    pub fn submit(&self, task: Runnable) -> Result<(), (Runnable, PoolError)> {
        if self.shutdown.load(Ordering::Acquire) {
            self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            return Err((task, PoolError::PoolShutdown));
        }

        let outcome = {
            let task_tx = self.task_tx.lock();
            match task_tx.as_ref() {
                Some(tx) => tx.try_send(task),
                None => Err(TrySendError::Disconnected(task)),
            }
        };

        match outcome {
            Ok(()) => {
                self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                warn!("Worker pool queue is full");
                Err((task, PoolError::QueueFull))
            }
            Err(TrySendError::Disconnected(task)) => {
                self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                Err((task, PoolError::PoolShutdown))
            }
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Whether [`WorkerPool::shutdown`] has been called or the pool dropped.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut down the pool gracefully with timeout.
    ///
    /// This drops the task sender to unblock idle workers, then attempts to join
    /// all workers with a timeout of 2 seconds per worker. Workers that don't
    /// exit within the timeout are detached. Runnables still queued are dropped.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        let current = thread::current().id();

        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.thread().id() == current {
                debug!(worker_id = idx, "Shutdown called from a worker - not joining self");
                continue;
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => {
                    debug!(worker_id = idx, "Worker joined successfully");
                }
                Ok(false) => {
                    warn!(worker_id = idx, "Worker panicked");
                }
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }

            let _ = join_thread.join();
        }

        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Runnable) -> Result<(), Rejected> {
        self.submit(task)
            .map_err(|(task, err)| Rejected::new(task, err.to_string()))
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop; the last handle may
        // be dropped from one of the workers.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    config: &WorkerPoolConfig,
    task_rx: Receiver<Runnable>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-{worker_id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            debug!(worker_id = worker_id, "Worker thread started");

            // When the sender is dropped (shutdown), recv returns Err.
            while let Ok(task) = task_rx.recv() {
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);

                if shutdown.load(Ordering::Acquire) {
                    // Dropping the runnable lets its owner observe the rejection.
                    drop(task);
                    counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                counters.active_tasks.fetch_add(1, Ordering::Relaxed);
                let outcome = panic::catch_unwind(AssertUnwindSafe(task));
                counters.active_tasks.fetch_sub(1, Ordering::Relaxed);

                match outcome {
                    Ok(()) => {
                        counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(payload) => {
                        counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                        error!(
                            worker_id = worker_id,
                            panic = %panic_message(payload.as_ref()),
                            "Runnable panicked on worker"
                        );
                    }
                }
            }

            debug!(worker_id = worker_id, "Worker thread exiting");
        })
}
