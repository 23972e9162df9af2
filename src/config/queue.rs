//! Deferred operation queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Batching parameters of a deferred operation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredQueueConfig {
    /// Maximum elements handed to the consumer in one call.
    pub batch_size: usize,
    /// How long a flush waits for a partial batch to fill up.
    pub max_delay_millis: u64,
}

impl Default for DeferredQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_delay_millis: 1_000,
        }
    }
}

impl DeferredQueueConfig {
    /// Configuration with the given batch size and delay. Delays beyond
    /// `u64::MAX` milliseconds are clamped.
    #[must_use]
    pub fn new(batch_size: usize, max_delay: Duration) -> Self {
        Self {
            batch_size,
            max_delay_millis: u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Maximum delay as a [`Duration`].
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_millis)
    }

    /// Validate the batching parameters.
    ///
    /// # Errors
    ///
    /// Fails when `batch_size` is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse from JSON and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
