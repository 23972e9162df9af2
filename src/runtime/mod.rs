//! Runtime adapters.

pub mod tokio_executor;

pub use tokio_executor::TokioBlockingExecutor;
