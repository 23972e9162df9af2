//! Configuration models for the scheduler, its worker pool and deferred queues.

pub mod pool;
pub mod queue;

pub use pool::{SchedulerConfig, WorkerPoolConfig};
pub use queue::DeferredQueueConfig;
