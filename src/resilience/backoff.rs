//! Exponential backoff with jitter.
//!
//! Delay for attempt `n` (0-based) is `min(base * multiplier^n, max)` plus a
//! uniform random component in `[0, base)` when jitter is enabled. The jitter
//! bound is an explicit tunable rather than a fraction of the computed delay.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Reusable delay policy built from a [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter_enabled,
        }
    }

    /// Delay before retrying after the given 0-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.raw_delay(attempt);
        if self.jitter {
            let bound = self.base.as_millis() as u64;
            if bound > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..bound));
            }
        }
        delay
    }

    /// Capped exponential delay without the jitter component.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(63) as i32);
        let millis = (self.base.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}
