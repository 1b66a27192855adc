//! Configuration for the index queue.

use crate::error::{QueueError, QueueResult};
use std::time::Duration;

/// Configuration for the asynchronous pipeline.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of partitions, each drained by one worker.
    pub workers: usize,
    /// Bounded capacity of each partition.
    pub partition_capacity: usize,
    /// Upper bound on a single apply attempt.
    pub apply_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            workers: 4,
            partition_capacity: 1024,
            apply_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the capacity of each partition.
    pub fn with_partition_capacity(mut self, capacity: usize) -> Self {
        self.partition_capacity = capacity;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks that the queue can be started with this configuration.
    pub fn validate(&self) -> QueueResult<()> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.partition_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "partition capacity must be at least 1".into(),
            ));
        }
        if self.apply_timeout.is_zero() {
            return Err(QueueError::InvalidConfig("apply timeout must be non-zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(QueueError::InvalidConfig("max attempts must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Returns the delay before attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra.
            Duration::from_secs_f64(delay + delay * 0.25 * jitter())
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random value in `[0, 1)` taken from the clock.
fn jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
