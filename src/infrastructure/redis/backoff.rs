//! Exponential backoff for resubscribe attempts

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000, // 30 seconds
            multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Exponential backoff calculator with jitter
pub struct ExponentialBackoff {
    config: BackoffConfig,
    base_delay_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            base_delay_ms: config.initial_delay_ms as f64,
            config,
            attempt: 0,
        }
    }

    /// Delay before the next attempt. The first call returns the
    /// initial delay; later calls grow by `multiplier` up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let capped = self.base_delay_ms.min(self.config.max_delay_ms as f64);
        self.base_delay_ms = (capped * self.config.multiplier).min(self.config.max_delay_ms as f64);

        let jitter_range = capped * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter_range > 0.0 {
            capped + rand::rng().random_range(-jitter_range..jitter_range)
        } else {
            capped
        };

        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// Reset the backoff to its initial state
    pub fn reset(&mut self) {
        self.base_delay_ms = self.config.initial_delay_ms as f64;
        self.attempt = 0;
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
