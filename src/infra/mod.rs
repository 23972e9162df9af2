//! Infrastructure built on top of the scheduler.

pub mod queue;

pub use queue::{BatchConsumer, DeferredOperationQueue};
