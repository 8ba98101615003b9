//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for a tracker connection and its sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Retry settings for remote calls.
    pub retry: RetryConfig,
    /// Optional limiter admission timeout. `None` blocks until a
    /// token is available or the sync is cancelled.
    pub acquire_timeout: Option<Duration>,
    /// Maximum concurrently executing operations.
    pub max_workers: usize,
    /// Whether to capture a snapshot before any mutating execution.
    pub capture_snapshots: bool,
}

impl SyncConfig {
    /// Creates a configuration with default limiter and retry
    /// settings.
    pub fn new() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            acquire_timeout: None,
            max_workers: 1,
            capture_snapshots: true,
        }
    }

    /// Sets the rate limiter settings.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the retry settings.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the limiter admission timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the worker bound for the execution engine.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Enables or disables pre-execution snapshots.
    pub fn with_capture_snapshots(mut self, capture: bool) -> Self {
        self.capture_snapshots = capture;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Token-bucket settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens the bucket can hold.
    pub burst_capacity: f64,
    /// Tokens refilled per second.
    pub refill_rate: f64,
}

impl RateLimitConfig {
    /// Creates limiter settings.
    pub fn new(burst_capacity: f64, refill_rate: f64) -> Self {
        Self {
            burst_capacity,
            refill_rate,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10.0, 1.0)
    }
}

/// Retry and backoff settings for remote calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates retry settings with the given retry budget.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            add_jitter: true,
        }
    }

    /// Creates settings that never retry.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            add_jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the backoff delay after the given failed attempt
    /// (0-indexed): `base_delay * 2^attempt`, capped at `max_delay`,
    /// with up to 25% jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(62) as i32);
        let delay_secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Simple deterministic "jitter" (no external RNG dependency).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_rate_limit(RateLimitConfig::new(5.0, 2.0))
            .with_retry(RetryConfig::new(1))
            .with_acquire_timeout(Duration::from_secs(2))
            .with_max_workers(4)
            .with_capture_snapshots(false);

        assert_eq!(config.rate_limit.burst_capacity, 5.0);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.max_workers, 4);
        assert!(!config.capture_snapshots);
    }

    #[test]
    fn worker_bound_never_zero() {
        let config = SyncConfig::new().with_max_workers(0);
        assert_eq!(config.max_workers, 1);
    }

    #[test]
    fn backoff_is_strictly_increasing() {
        let config = RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(false);

        let mut previous = Duration::ZERO;
        for attempt in 0..=config.max_retries {
            let delay = config.delay_for_attempt(attempt);
            assert!(delay > previous, "attempt {attempt} did not grow");
            previous = delay;
        }
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let config = RetryConfig::new(3)
            .with_base_delay(Duration::from_millis(50))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn backoff_respects_max_delay() {
        let config = RetryConfig::new(10)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::new(3).with_base_delay(Duration::from_millis(100));

        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(200));
        assert!(delay <= Duration::from_millis(250));
    }
}
