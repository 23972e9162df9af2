//! Deferred operation queue: coalesces many small additions into few bulk
//! consumer calls.
//!
//! Elements added inside a transaction are staged and only become visible to
//! the flusher when that transaction commits; a rollback discards them.
//! Promoted elements are handed to the consumer in batches of at most
//! `batch_size` by a flush job running on the scheduler. At most one flush is
//! in flight per queue; it waits up to `max_delay` for a partial batch to
//! fill before delivering it.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::config::DeferredQueueConfig;
//! use prometheus_jobs::infra::queue::DeferredOperationQueue;
//!
//! let queue = DeferredOperationQueue::new(
//!     &scheduler,
//!     "search-index",
//!     DeferredQueueConfig::new(50, Duration::from_millis(200)),
//!     |batch: Vec<DocId>, _tx: &Transaction| index.reindex(&batch),
//! )?;
//! queue.add(doc_id);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::DeferredQueueConfig;
use crate::core::{
    FailureOrigin, JobError, JobInput, RunContext, Scheduler, SchedulerError, Transaction,
    TransactionId, TransactionMember,
};
use crate::util::panic_message;

/// Receives batches of promoted elements.
pub trait BatchConsumer<T>: Send + Sync + 'static {
    /// Process one batch inside its own transaction.
    ///
    /// # Errors
    ///
    /// A failure rolls the batch transaction back and is reported to the
    /// scheduler's exception handler; later batches are still delivered.
    fn consume(&self, batch: Vec<T>, transaction: &Transaction) -> anyhow::Result<()>;
}

impl<T, F> BatchConsumer<T> for F
where
    F: Fn(Vec<T>, &Transaction) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn consume(&self, batch: Vec<T>, transaction: &Transaction) -> anyhow::Result<()> {
        self(batch, transaction)
    }
}

struct Buffer<T> {
    promoted: VecDeque<T>,
    /// Generation of the flush currently in flight.
    flight: Option<u64>,
    next_flight: u64,
    /// Synchronous `flush` calls waiting; the flusher stops delaying.
    flush_requests: usize,
}

impl<T> Buffer<T> {
    fn claim_flight(&mut self) -> u64 {
        let generation = self.next_flight;
        self.next_flight += 1;
        self.flight = Some(generation);
        generation
    }
}

struct QueueInner<T> {
    name: String,
    member_id: String,
    batch_size: usize,
    max_delay: Duration,
    consumer: Box<dyn BatchConsumer<T>>,
    scheduler: Scheduler,
    run_context: RunContext,
    staging: Mutex<HashMap<TransactionId, Vec<T>>>,
    buffer: Mutex<Buffer<T>>,
    changed: Condvar,
}

/// Transactional batching queue. Clones share the same queue.
pub struct DeferredOperationQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for DeferredOperationQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for DeferredOperationQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredOperationQueue")
            .field("name", &self.inner.name)
            .field("batch_size", &self.inner.batch_size)
            .field("max_delay", &self.inner.max_delay)
            .field("pending", &self.inner.buffer.lock().promoted.len())
            .finish()
    }
}

impl<T: Send + 'static> DeferredOperationQueue<T> {
    /// Queue flushing on `scheduler` with an empty run context.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when `batch_size` is zero.
    pub fn new(
        scheduler: &Scheduler,
        name: impl Into<String>,
        config: DeferredQueueConfig,
        consumer: impl BatchConsumer<T>,
    ) -> Result<Self, SchedulerError> {
        Self::with_run_context(scheduler, name, config, RunContext::empty(), consumer)
    }

    /// Queue whose flush jobs and batch transactions run in `run_context`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when `batch_size` is zero.
    pub fn with_run_context(
        scheduler: &Scheduler,
        name: impl Into<String>,
        config: DeferredQueueConfig,
        run_context: RunContext,
        consumer: impl BatchConsumer<T>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let name = name.into();
        let member_id = format!("deferred-queue:{name}:{}", uuid::Uuid::new_v4());
        Ok(Self {
            inner: Arc::new(QueueInner {
                name,
                member_id,
                batch_size: config.batch_size,
                max_delay: config.max_delay(),
                consumer: Box::new(consumer),
                scheduler: scheduler.clone(),
                run_context,
                staging: Mutex::new(HashMap::new()),
                buffer: Mutex::new(Buffer {
                    promoted: VecDeque::new(),
                    flight: None,
                    next_flight: 0,
                    flush_requests: 0,
                }),
                changed: Condvar::new(),
            }),
        })
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Maximum time a partial batch waits to fill up.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.inner.max_delay
    }

    /// Promoted elements not yet handed to the consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().promoted.len()
    }

    /// Whether no promoted element is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add one element, committed immediately.
    pub fn add(&self, element: T) {
        self.add_all(std::iter::once(element));
    }

    /// Add elements, committed immediately.
    pub fn add_all(&self, elements: impl IntoIterator<Item = T>) {
        QueueInner::promote(&self.inner, elements.into_iter().collect());
    }

    /// Stage one element under `transaction`.
    pub fn add_in(&self, transaction: &Transaction, element: T) {
        self.add_all_in(transaction, std::iter::once(element));
    }

    /// Stage elements under `transaction`. They are promoted, in order, only
    /// when it commits.
    pub fn add_all_in(&self, transaction: &Transaction, elements: impl IntoIterator<Item = T>) {
        let elements: Vec<T> = elements.into_iter().collect();
        if elements.is_empty() {
            return;
        }
        self.inner
            .staging
            .lock()
            .entry(transaction.id())
            .or_default()
            .extend(elements);
        transaction.register_member(Box::new(StagingMember {
            member_id: self.inner.member_id.clone(),
            transaction: transaction.id(),
            queue: Arc::downgrade(&self.inner),
        }));
    }

    /// Deliver every promoted element now, on the calling thread.
    ///
    /// Waits for an in-flight flush to finish first; that flush stops
    /// waiting for its batch to fill. Must not be called from a job while
    /// the scheduler's executor has no other thread left to run the
    /// in-flight flush job.
    pub fn flush(&self) {
        let inner = &self.inner;
        {
            let mut buffer = inner.buffer.lock();
            buffer.flush_requests += 1;
            inner.changed.notify_all();
            while buffer.flight.is_some() {
                inner.changed.wait(&mut buffer);
            }
            buffer.claim_flight();
            buffer.flush_requests -= 1;
        }
        inner.run_flight(true);
    }

    /// Run the flush loop on the calling thread as the queue's single
    /// flusher.
    ///
    /// Delivers full batches while there are any. With fewer than
    /// `batch_size` elements left, `single_run` delivers the partial batch
    /// and returns; otherwise the loop first waits up to `max_delay` for the
    /// batch to fill.
    pub fn flush_deferred(&self, single_run: bool) {
        let inner = &self.inner;
        {
            let mut buffer = inner.buffer.lock();
            while buffer.flight.is_some() {
                inner.changed.wait(&mut buffer);
            }
            buffer.claim_flight();
        }
        inner.run_flight(single_run);
    }
}

impl<T: Send + 'static> QueueInner<T> {
    fn promote(inner: &Arc<Self>, elements: Vec<T>) {
        if elements.is_empty() {
            return;
        }
        let generation = {
            let mut buffer = inner.buffer.lock();
            buffer.promoted.extend(elements);
            inner.changed.notify_all();
            if buffer.flight.is_some() {
                None
            } else {
                Some(buffer.claim_flight())
            }
        };
        if let Some(generation) = generation {
            Self::schedule_flush(inner, generation);
        }
    }

    fn schedule_flush(inner: &Arc<Self>, generation: u64) {
        let guard = FlightGuard {
            queue: Arc::clone(inner),
            generation,
        };
        let input = JobInput::named(format!("deferred-flush:{}", inner.name))
            .with_run_context(inner.run_context.clone());
        let flush = inner.scheduler.schedule(
            move |_ctx| {
                guard.queue.run_flight(false);
                drop(guard);
                Ok(())
            },
            input,
        );
        debug!(queue = %inner.name, job_id = flush.id(), "flush job scheduled");
    }

    /// Drain as the flight owner, then give up the flight once the buffer is
    /// observed empty under the lock.
    fn run_flight(&self, single_run: bool) {
        loop {
            self.drain(single_run);
            let mut buffer = self.buffer.lock();
            if buffer.promoted.is_empty() {
                buffer.flight = None;
                self.changed.notify_all();
                return;
            }
        }
    }

    fn drain(&self, single_run: bool) {
        loop {
            let (batch, last) = {
                let mut buffer = self.buffer.lock();
                if !single_run && buffer.flush_requests == 0 && buffer.promoted.len() < self.batch_size {
                    let deadline = Instant::now().checked_add(self.max_delay);
                    while buffer.promoted.len() < self.batch_size && buffer.flush_requests == 0 {
                        let timed_out = match deadline {
                            Some(deadline) => self.changed.wait_until(&mut buffer, deadline).timed_out(),
                            None => {
                                self.changed.wait(&mut buffer);
                                false
                            }
                        };
                        if timed_out {
                            break;
                        }
                    }
                }
                let full = buffer.promoted.len() >= self.batch_size;
                let take = buffer.promoted.len().min(self.batch_size);
                let batch: Vec<T> = buffer.promoted.drain(..take).collect();
                (batch, !full)
            };
            if !batch.is_empty() {
                self.deliver(batch);
            }
            if last {
                return;
            }
        }
    }

    fn deliver(&self, batch: Vec<T>) {
        let size = batch.len();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_context
                .call(|transaction| self.consumer.consume(batch, transaction))
        }));
        let err = match outcome {
            Ok(Ok(())) => {
                debug!(queue = %self.name, batch_size = size, "batch delivered");
                return;
            }
            Ok(Err(err)) => err,
            Err(payload) => anyhow!("batch consumer panicked: {}", panic_message(payload.as_ref())),
        };
        error!(queue = %self.name, batch_size = size, error = %err, "batch consumer failed");
        let origin = FailureOrigin {
            job_id: None,
            name: self.name.clone(),
            domain: None,
        };
        self.scheduler
            .shared()
            .report_failure(&origin, &JobError::ConsumerFailed(Arc::new(err)));
    }
}

/// Clears the flight flag if the flush job is dropped without running.
struct FlightGuard<T> {
    queue: Arc<QueueInner<T>>,
    generation: u64,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        let mut buffer = self.queue.buffer.lock();
        if buffer.flight == Some(self.generation) {
            buffer.flight = None;
            self.queue.changed.notify_all();
            if !buffer.promoted.is_empty() {
                warn!(
                    queue = %self.queue.name,
                    pending = buffer.promoted.len(),
                    "flush job did not run; elements wait for the next addition or flush"
                );
            }
        }
    }
}

/// Promotes a transaction's staged elements on commit.
struct StagingMember<T> {
    member_id: String,
    transaction: TransactionId,
    queue: Weak<QueueInner<T>>,
}

impl<T: Send + 'static> TransactionMember for StagingMember<T> {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn commit(&self) -> anyhow::Result<()> {
        let Some(queue) = self.queue.upgrade() else {
            return Ok(());
        };
        let staged = queue.staging.lock().remove(&self.transaction);
        if let Some(staged) = staged {
            QueueInner::promote(&queue, staged);
        }
        Ok(())
    }

    fn rollback(&self) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        let discarded = queue.staging.lock().remove(&self.transaction);
        if let Some(discarded) = discarded {
            debug!(queue = %queue.name, tx = %self.transaction, discarded = discarded.len(), "staged elements rolled back");
        }
    }
}
