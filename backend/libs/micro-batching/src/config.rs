//! Batching engine configuration
//!
//! Values can be built in code or loaded from `MICROBATCH_*` environment variables.

use crate::error::{BatcherError, BatcherResult};
use std::time::Duration;

/// Multiplier applied to `batch_size` when no explicit queue capacity is given.
pub const QUEUE_CAPACITY_FACTOR: usize = 10;

/// Largest ingress queue a tokio channel can be built with.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Micro-batching engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Number of jobs that triggers an immediate flush
    pub batch_size: usize,
    /// Period of the flush timer for partially filled batches
    pub batch_interval: Duration,
    /// Residency limit for consumed results, also the sweep period
    pub result_ttl: Duration,
    /// Capacity of the ingress queue; submitters wait once it is full
    pub queue_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(100), Duration::from_secs(60))
    }
}

impl BatcherConfig {
    /// Create a config with the ingress queue sized to ten batches.
    pub fn new(batch_size: usize, batch_interval: Duration, result_ttl: Duration) -> Self {
        Self {
            batch_size,
            batch_interval,
            result_ttl,
            queue_capacity: batch_size.saturating_mul(QUEUE_CAPACITY_FACTOR),
        }
    }

    /// Override the ingress queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Load configuration from environment variables
    ///
    /// - `MICROBATCH_BATCH_SIZE` (default 10)
    /// - `MICROBATCH_BATCH_INTERVAL_MS` (default 100)
    /// - `MICROBATCH_RESULT_TTL_SECS` (default 60)
    /// - `MICROBATCH_QUEUE_CAPACITY` (default `batch_size * 10`)
    ///
    /// Unset or unparsable values fall back to the defaults. The result is validated.
    pub fn from_env() -> BatcherResult<Self> {
        Self::from_env_with_defaults(Self::default())
    }

    /// Same as [`from_env`](Self::from_env) but falls back to `defaults`.
    pub fn from_env_with_defaults(defaults: Self) -> BatcherResult<Self> {
        let batch_size = env_parse("MICROBATCH_BATCH_SIZE").unwrap_or(defaults.batch_size);
        let batch_interval = env_parse("MICROBATCH_BATCH_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_interval);
        let result_ttl = env_parse("MICROBATCH_RESULT_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.result_ttl);

        let default_capacity = if batch_size == defaults.batch_size {
            defaults.queue_capacity
        } else {
            batch_size.saturating_mul(QUEUE_CAPACITY_FACTOR)
        };
        let queue_capacity = env_parse("MICROBATCH_QUEUE_CAPACITY").unwrap_or(default_capacity);

        let config = Self {
            batch_size,
            batch_interval,
            result_ttl,
            queue_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero sizes, zero durations and queues tokio cannot allocate.
    pub fn validate(&self) -> BatcherResult<()> {
        if self.batch_size == 0 {
            return Err(BatcherError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.batch_interval.is_zero() {
            return Err(BatcherError::InvalidConfig(
                "batch_interval must be positive".to_string(),
            ));
        }
        if self.result_ttl.is_zero() {
            return Err(BatcherError::InvalidConfig(
                "result_ttl must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BatcherError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(BatcherError::InvalidConfig(format!(
                "queue_capacity must not exceed {}",
                MAX_QUEUE_CAPACITY
            )));
        }
        Ok(())
    }
}

fn env_parse<V: std::str::FromStr>(key: &str) -> Option<V> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, config.batch_size * QUEUE_CAPACITY_FACTOR);
    }

    #[test]
    fn test_new_sizes_queue_from_batch_size() {
        let config = BatcherConfig::new(3, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 30);

        let config = config.with_queue_capacity(5);
        assert_eq!(config.queue_capacity, 5);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let base = BatcherConfig::new(3, Duration::from_millis(50), Duration::from_secs(1));

        let zero_size = BatcherConfig {
            batch_size: 0,
            ..base.clone()
        };
        assert!(matches!(
            zero_size.validate(),
            Err(BatcherError::InvalidConfig(_))
        ));

        let zero_interval = BatcherConfig {
            batch_interval: Duration::ZERO,
            ..base.clone()
        };
        assert!(zero_interval.validate().is_err());

        let zero_ttl = BatcherConfig {
            result_ttl: Duration::ZERO,
            ..base.clone()
        };
        assert!(zero_ttl.validate().is_err());

        let zero_queue = base.with_queue_capacity(0);
        assert!(zero_queue.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_queue() {
        // batch_size * 10 saturates to usize::MAX
        let huge_batch = BatcherConfig::new(
            usize::MAX / 4,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert_eq!(huge_batch.queue_capacity, usize::MAX);
        assert!(matches!(
            huge_batch.validate(),
            Err(BatcherError::InvalidConfig(_))
        ));

        let base = BatcherConfig::new(1, Duration::from_millis(10), Duration::from_secs(1));
        assert!(base
            .clone()
            .with_queue_capacity(usize::MAX)
            .validate()
            .is_err());
        assert!(base
            .with_queue_capacity(MAX_QUEUE_CAPACITY)
            .validate()
            .is_ok());
    }

    // Single test touching the environment to avoid races between test threads.
    #[test]
    fn test_from_env_overrides_and_fallbacks() {
        std::env::set_var("MICROBATCH_BATCH_SIZE", "4");
        std::env::set_var("MICROBATCH_BATCH_INTERVAL_MS", "250");
        std::env::set_var("MICROBATCH_RESULT_TTL_SECS", "not-a-number");
        std::env::remove_var("MICROBATCH_QUEUE_CAPACITY");

        let config = BatcherConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.batch_interval, Duration::from_millis(250));
        assert_eq!(config.result_ttl, Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 40);

        std::env::set_var("MICROBATCH_BATCH_SIZE", "0");
        assert!(BatcherConfig::from_env().is_err());

        std::env::remove_var("MICROBATCH_BATCH_SIZE");
        std::env::remove_var("MICROBATCH_BATCH_INTERVAL_MS");
        std::env::remove_var("MICROBATCH_RESULT_TTL_SECS");
    }
}
