//! Queues that hand work to the scheduler.

pub mod deferred;

pub use deferred::{BatchConsumer, DeferredOperationQueue};
