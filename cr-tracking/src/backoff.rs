//! Reconnect backoff policy.
//!
//! Doubles the wait after every failed attempt up to a cap and snaps back
//! to the base delay after a successful connection.

use std::time::Duration;

use cr_core::config::TrackingConfig;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0) applied to each waited delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        }
    }
}

impl From<&TrackingConfig> for ReconnectConfig {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }
}

/// Capped exponential backoff.
///
/// Invariant: `base <= current <= max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffPolicy {
    /// Create a policy starting at `base`. A `max` below `base` is raised
    /// to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self { base, max, current: base }
    }

    /// Reset after a successful connection.
    pub fn on_success(&mut self) {
        self.current = self.base;
    }

    /// Record a failed attempt and return how long to wait before the next one.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// The delay the next failure will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }
}

/// Spread `delay` by up to `+/- factor * delay`.
///
/// A factor of zero (the default) returns `delay` unchanged.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let factor = factor.min(1.0);
    let secs = delay.as_secs_f64();
    let jitter = (rand::random::<f64>() * 2.0 - 1.0) * secs * factor;
    Duration::from_secs_f64((secs + jitter).max(0.0))
}
