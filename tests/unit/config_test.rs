//! Tests for configuration validation

use std::time::Duration;

use prometheus_jobs::config::{DeferredQueueConfig, SchedulerConfig, WorkerPoolConfig};

#[test]
fn test_worker_pool_config_validation() {
    let valid = WorkerPoolConfig::new()
        .with_worker_count(4)
        .with_max_queue_depth(50);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_worker_pool_config_invalid_worker_count() {
    let invalid = WorkerPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_invalid_queue_depth() {
    let invalid = WorkerPoolConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_invalid_stack_size() {
    let invalid = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_tick() {
    let config = SchedulerConfig {
        expiration_tick_millis: 0,
        ..SchedulerConfig::default()
    };
    assert!(config.validate().is_err());
    assert_eq!(SchedulerConfig::default().expiration_tick(), Duration::from_millis(100));
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "worker_pool": {
            "worker_count": 6,
            "max_queue_depth": 50,
            "thread_name_prefix": "jobs"
        },
        "expiration_tick_millis": 250,
        "log_on_error": false
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.worker_pool.worker_count, 6);
    assert_eq!(config.worker_pool.thread_name_prefix, "jobs");
    assert_eq!(config.expiration_tick(), Duration::from_millis(250));
    assert!(!config.log_on_error);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    let result = SchedulerConfig::from_json_str(r#"{"worker_pool":{"worker_count":0}}"#);
    assert!(result.unwrap_err().contains("worker_count"));
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_scheduler_config_from_env() {
    std::env::set_var("JOBS_WORKER_COUNT", "3");
    std::env::set_var("JOBS_LOG_ON_ERROR", "false");
    let config = SchedulerConfig::from_env();
    std::env::remove_var("JOBS_WORKER_COUNT");
    std::env::remove_var("JOBS_LOG_ON_ERROR");

    let config = config.unwrap();
    assert_eq!(config.worker_pool.worker_count, 3);
    assert!(!config.log_on_error);
}

#[test]
fn test_deferred_queue_config() {
    let config = DeferredQueueConfig::new(25, Duration::from_millis(300));
    assert_eq!(config.batch_size, 25);
    assert_eq!(config.max_delay(), Duration::from_millis(300));
    assert!(config.validate().is_ok());

    let defaults = DeferredQueueConfig::from_json_str("{}").unwrap();
    assert_eq!(defaults, DeferredQueueConfig::default());
    assert!(DeferredQueueConfig::from_json_str(r#"{"batch_size":0}"#).is_err());
}

#[test]
fn test_deferred_queue_config_clamps_huge_delay() {
    let config = DeferredQueueConfig::new(1, Duration::MAX);
    assert_eq!(config.max_delay_millis, u64::MAX);
    assert_eq!(config.max_delay(), Duration::from_millis(u64::MAX));
}
