//! Reconnect Backoff
//!
//! Exponential backoff with symmetric jitter between bus connection
//! attempts. The delay doubles after each failed attempt up to a ceiling and
//! returns to the initial delay once a connection succeeds.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Give up after this many consecutive failures (0 = never).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Build from bus settings.
    #[must_use]
    pub fn from_bus_settings(settings: &crate::BusSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Same config with jitter disabled.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Stateful backoff over consecutive failed attempts.
///
/// # Example
///
/// ```rust
/// use pano_viewer::infrastructure::bus::reconnect::{Backoff, BackoffConfig};
///
/// let mut backoff = Backoff::new(BackoffConfig::default());
/// assert!(backoff.next_delay().is_some());
/// backoff.reset();
/// assert_eq!(backoff.attempts(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff with no failed attempts.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next.
    ///
    /// Returns `None` once `max_attempts` failures have been recorded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }

        let base = self.base_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        Some(self.jittered(base))
    }

    /// Forget failures after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failed attempts so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }

    /// Un-jittered delay for the given zero-based attempt.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let millis = self.config.initial_delay.as_millis() as f64 * factor;
        #[allow(clippy::cast_precision_loss)]
        let ceiling = self.config.max_delay.as_millis() as f64;

        if !millis.is_finite() || millis >= ceiling {
            return self.config.max_delay;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = millis.round() as u64;
        Duration::from_millis(rounded)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let millis = delay.as_millis() as f64;
        let spread = millis * self.config.jitter_factor;
        let offset = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (millis + offset).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}
