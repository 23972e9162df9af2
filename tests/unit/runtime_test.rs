//! Tests for the tokio blocking executor

use std::sync::Arc;
use std::time::Duration;

use prometheus_jobs::config::SchedulerConfig;
use prometheus_jobs::core::{CancelCause, Executor, JobInput, Scheduler};
use prometheus_jobs::runtime::TokioBlockingExecutor;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_executor_runs_jobs() {
    let executor = TokioBlockingExecutor::current().expect("inside a runtime");
    let scheduler = Scheduler::builder(SchedulerConfig::default())
        .executor(Arc::new(executor))
        .build()
        .unwrap();

    let future = scheduler.schedule(
        |ctx| {
            ctx.sleep(Duration::from_millis(5))?;
            Ok(123)
        },
        JobInput::new().with_domain("tokio"),
    );

    let result = future
        .await_done_and_get_async(Duration::from_secs(5))
        .await
        .expect("job result");
    assert_eq!(result, 123);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_executor_rejects_after_shutdown() {
    let executor = TokioBlockingExecutor::current().unwrap();
    executor.shutdown();

    let scheduler = Scheduler::builder(SchedulerConfig::default())
        .executor(Arc::new(executor))
        .build()
        .unwrap();
    let future = scheduler.schedule(|_ctx| Ok(()), JobInput::new());
    assert_eq!(future.cancel_cause(), Some(CancelCause::Rejected));
}

#[test]
fn test_current_outside_runtime_fails() {
    assert!(TokioBlockingExecutor::current().is_err());
}
