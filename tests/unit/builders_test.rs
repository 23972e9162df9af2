//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_jobs::builders::SchedulerBuilder;
use prometheus_jobs::config::{SchedulerConfig, WorkerPoolConfig};
use prometheus_jobs::core::{Executor, JobInput, SchedulerError, WorkerPool};

#[test]
fn test_scheduler_builder_keeps_config() {
    let config = SchedulerConfig {
        expiration_tick_millis: 40,
        ..SchedulerConfig::default()
    };
    let builder = SchedulerBuilder::new(config);
    assert_eq!(builder.config().expiration_tick_millis, 40);

    let scheduler = builder.build().unwrap();
    assert_eq!(scheduler.config().expiration_tick_millis, 40);
}

#[test]
fn test_scheduler_builder_rejects_invalid_config() {
    let config = SchedulerConfig {
        worker_pool: WorkerPoolConfig::new().with_worker_count(0),
        ..SchedulerConfig::default()
    };
    let result = SchedulerBuilder::new(config).build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_scheduler_builder_with_factory_closure() {
    let config = SchedulerConfig {
        worker_pool: WorkerPoolConfig::new().with_worker_count(3),
        ..SchedulerConfig::default()
    };
    let scheduler = SchedulerBuilder::new(config)
        .executor_factory(|config: &SchedulerConfig| -> Result<Arc<dyn Executor>, SchedulerError> {
            let pool = WorkerPool::new(
                config
                    .worker_pool
                    .clone()
                    .with_thread_name_prefix("custom-worker"),
            )
            .map_err(|e| SchedulerError::Executor(e.to_string()))?;
            Ok(Arc::new(pool))
        })
        .build()
        .unwrap();

    let future = scheduler.schedule(
        |_ctx| Ok(std::thread::current().name().map(str::to_string)),
        JobInput::new(),
    );
    let name = future
        .await_done_and_get(Some(Duration::from_secs(5)))
        .unwrap()
        .unwrap();
    assert!(name.starts_with("custom-worker-"));
}
