//! Tests for error types

use std::sync::Arc;

use prometheus_jobs::core::{JobError, PoolError, SchedulerError, TimeoutKind};

#[test]
fn test_timeout_error_display() {
    assert_eq!(
        JobError::Timeout(TimeoutKind::Expired).to_string(),
        "timeout: expired before start"
    );
    assert_eq!(
        JobError::Timeout(TimeoutKind::WaitFor).to_string(),
        "timeout: wait-for elapsed"
    );
}

#[test]
fn test_task_failed_keeps_job_error_kind() {
    let err = JobError::task_failed(anyhow::Error::new(JobError::Interrupted));
    assert!(err.is_interruption());

    let err = JobError::task_failed(anyhow::anyhow!("disk full"));
    assert_eq!(err.to_string(), "job failed: disk full");
    assert!(!err.is_cancellation());
}

#[test]
fn test_consumer_failed_display() {
    let err = JobError::ConsumerFailed(Arc::new(anyhow::anyhow!("duplicate key")));
    assert_eq!(err.to_string(), "batch consumer failed: duplicate key");
}

#[test]
fn test_scheduler_error_display() {
    let err = SchedulerError::AwaitWhileHoldingPermit("ledger".to_string());
    assert!(err.to_string().contains("ledger"));
    assert!(SchedulerError::InvalidConfig("bad".into()).to_string().contains("bad"));
}

#[test]
fn test_pool_error_display() {
    assert_eq!(PoolError::QueueFull.to_string(), "task queue is full");
    assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
}
