//! Queue configuration.
//!
//! `QueueConfig` is read by every component of the queue: admission
//! capacity, concurrency bounds, retry behavior, scaling thresholds,
//! and the health-check cadence. It can be updated at runtime through
//! [`ConfigUpdate`]; changes take effect on the next scheduling or
//! monitoring tick, never retroactively.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::DEFAULT_MAX_RETRIES;

/// Configuration for a [`GenerationQueue`](crate::scheduler::GenerationQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of admitted jobs (pending + in-flight).
    pub capacity: usize,
    /// Concurrency ceiling the queue starts at, and the floor it may
    /// never be scaled below.
    pub base_concurrency: usize,
    /// Hard upper bound the ceiling may never be scaled above.
    pub max_concurrency: usize,
    /// How long a failed job waits before re-entering the admission queue.
    pub retry_delay: Duration,
    /// Maximum retries per job before it is terminally failed.
    pub max_retries: u32,
    /// Queue utilization above which the monitor considers scaling up.
    pub scale_up_threshold: f64,
    /// Queue utilization below which the monitor considers scaling down.
    pub scale_down_threshold: f64,
    /// How many slots a single scale operation adds or removes.
    pub scale_step: usize,
    /// Interval between health-monitor ticks.
    pub health_check_interval: Duration,
    /// How long terminal job records are retained for status reads and
    /// statistics before cleanup.
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            base_concurrency: 2,
            max_concurrency: 8,
            retry_delay: Duration::from_secs(2),
            max_retries: DEFAULT_MAX_RETRIES,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_step: 1,
            health_check_interval: Duration::from_secs(5),
            retention: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the given admission capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Sets the base (and minimum) concurrency ceiling.
    pub fn with_base_concurrency(mut self, n: usize) -> Self {
        self.base_concurrency = n;
        self
    }

    /// Sets the maximum concurrency ceiling.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Sets the delay before a failed job is re-admitted.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the maximum retries per job.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the scale-up and scale-down utilization thresholds.
    pub fn with_scale_thresholds(mut self, up: f64, down: f64) -> Self {
        self.scale_up_threshold = up;
        self.scale_down_threshold = down;
        self
    }

    /// Sets the per-operation scaling step.
    pub fn with_scale_step(mut self, step: usize) -> Self {
        self.scale_step = step;
        self
    }

    /// Sets the health-monitor tick interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the terminal-record retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Applies a partial update, overwriting only the fields it names.
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(capacity) = update.capacity {
            self.capacity = capacity;
        }
        if let Some(base) = update.base_concurrency {
            self.base_concurrency = base;
        }
        if let Some(max) = update.max_concurrency {
            self.max_concurrency = max;
        }
        if let Some(delay) = update.retry_delay {
            self.retry_delay = delay;
        }
        if let Some(retries) = update.max_retries {
            self.max_retries = retries;
        }
        if let Some(up) = update.scale_up_threshold {
            self.scale_up_threshold = up;
        }
        if let Some(down) = update.scale_down_threshold {
            self.scale_down_threshold = down;
        }
        if let Some(step) = update.scale_step {
            self.scale_step = step;
        }
        if let Some(interval) = update.health_check_interval {
            self.health_check_interval = interval;
        }
        if let Some(retention) = update.retention {
            self.retention = retention;
        }
    }
}

/// Partial configuration overlay for runtime reconfiguration.
///
/// Every field is optional; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub capacity: Option<usize>,
    pub base_concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub retry_delay: Option<Duration>,
    pub max_retries: Option<u32>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_step: Option<usize>,
    pub health_check_interval: Option<Duration>,
    pub retention: Option<Duration>,
}

impl ConfigUpdate {
    /// Creates an empty update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the admission capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Overrides the base concurrency ceiling.
    pub fn base_concurrency(mut self, n: usize) -> Self {
        self.base_concurrency = Some(n);
        self
    }

    /// Overrides the maximum concurrency ceiling.
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Overrides the retry delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Overrides the maximum retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();

        assert_eq!(config.capacity, 10);
        assert_eq!(config.base_concurrency, 2);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new(20)
            .with_base_concurrency(4)
            .with_max_concurrency(16)
            .with_retry_delay(Duration::from_millis(500))
            .with_max_retries(5)
            .with_scale_thresholds(0.9, 0.2)
            .with_scale_step(2)
            .with_health_check_interval(Duration::from_secs(1))
            .with_retention(Duration::from_secs(60));

        assert_eq!(config.capacity, 20);
        assert_eq!(config.base_concurrency, 4);
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.max_retries, 5);
        assert!((config.scale_up_threshold - 0.9).abs() < f64::EPSILON);
        assert!((config.scale_down_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.scale_step, 2);
        assert_eq!(config.retention, Duration::from_secs(60));
    }

    #[test]
    fn test_apply_partial_update() {
        let mut config = QueueConfig::default();

        config.apply(
            ConfigUpdate::new()
                .capacity(50)
                .max_retries(1)
                .retry_delay(Duration::from_millis(100)),
        );

        assert_eq!(config.capacity, 50);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        // Untouched fields keep their defaults
        assert_eq!(config.base_concurrency, 2);
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut config = QueueConfig::new(7).with_max_retries(1);
        let before = config.clone();

        config.apply(ConfigUpdate::new());

        assert_eq!(config.capacity, before.capacity);
        assert_eq!(config.max_retries, before.max_retries);
    }

    #[test]
    fn test_config_serialization() {
        let config = QueueConfig::default();
        let json = serde_json::to_string(&config).expect("serialization should work");
        let parsed: QueueConfig = serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed.capacity, config.capacity);
        assert_eq!(parsed.retry_delay, config.retry_delay);
    }
}
