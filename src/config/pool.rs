//! Worker pool and scheduler configuration structures.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the dedicated worker thread pool.
///
/// Jobs suspended on a blocking condition keep occupying their worker
/// thread, so size the pool for the expected number of concurrently blocked
/// jobs plus the runnable ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum runnables waiting for a free worker before the pool rejects.
    pub max_queue_depth: usize,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Prefix of worker thread names (`{prefix}-{id}`).
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: (num_cpus::get() * 2).max(8),
            max_queue_depth: 10_000,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "job-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Default configuration sized from the number of CPUs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool backing the default executor.
    pub worker_pool: WorkerPoolConfig,
    /// Upper bound on how long the expiration monitor sleeps between checks.
    pub expiration_tick_millis: u64,
    /// Whether jobs report unobserved failures to the exception handler
    /// unless their submission overrides it.
    pub log_on_error: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool: WorkerPoolConfig::default(),
            expiration_tick_millis: 100,
            log_on_error: true,
        }
    }
}

impl SchedulerConfig {
    /// Expiration monitor tick as a [`Duration`].
    #[must_use]
    pub const fn expiration_tick(&self) -> Duration {
        Duration::from_millis(self.expiration_tick_millis)
    }

    /// Validate the scheduler and its worker pool.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.worker_pool
            .validate()
            .map_err(|e| format!("worker_pool invalid: {e}"))?;
        if self.expiration_tick_millis == 0 {
            return Err("expiration_tick_millis must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `JOBS_*` environment variables, loading a
    /// `.env` file first when one is present.
    ///
    /// Recognised variables: `JOBS_WORKER_COUNT`, `JOBS_MAX_QUEUE_DEPTH`,
    /// `JOBS_THREAD_STACK_SIZE`, `JOBS_EXPIRATION_TICK_MILLIS`,
    /// `JOBS_LOG_ON_ERROR`. Unset variables keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation error.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = read_env("JOBS_WORKER_COUNT")? {
            cfg.worker_pool.worker_count = v;
        }
        if let Some(v) = read_env("JOBS_MAX_QUEUE_DEPTH")? {
            cfg.worker_pool.max_queue_depth = v;
        }
        if let Some(v) = read_env("JOBS_THREAD_STACK_SIZE")? {
            cfg.worker_pool.thread_stack_size = v;
        }
        if let Some(v) = read_env("JOBS_EXPIRATION_TICK_MILLIS")? {
            cfg.expiration_tick_millis = v;
        }
        if let Some(v) = read_env("JOBS_LOG_ON_ERROR")? {
            cfg.log_on_error = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_env<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{key}: {e}")),
    }
}
