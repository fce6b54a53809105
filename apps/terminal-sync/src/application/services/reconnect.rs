//! Reconnect Backoff Policy
//!
//! Exponential backoff with jitter for stream reconnection. Delays grow
//! from the initial value by a fixed multiplier up to a bounded maximum;
//! an optional attempt ceiling turns the stream's retry loop into a
//! terminal failure once exhausted.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter fraction applied to each delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempt ceiling; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Stateful backoff over a [`BackoffConfig`].
///
/// `next_delay` yields the delay to sleep before the upcoming attempt,
/// or `None` once the ceiling is exhausted. `reset` is called after a
/// successful connect so the next outage starts from the initial delay.
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectBackoff {
    /// Create a backoff tracker.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Delay before the next attempt, or `None` past the ceiling.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let exponent = self.attempts;
        self.attempts += 1;

        Some(self.jittered(self.delay_for_attempt(exponent)))
    }

    /// Number of attempts issued since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    /// Forget accumulated attempts after a successful connect.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let initial = self.config.initial_delay.as_millis() as f64;
        let factor = self.config.multiplier.max(1.0);
        let raw = initial * factor.powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        let capped = raw.min(
            #[allow(clippy::cast_precision_loss)]
            {
                self.config.max_delay.as_millis() as f64
            },
        );

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base + offset).max(1.0) as u64)
    }
}
