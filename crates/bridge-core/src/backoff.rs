//! Reconnect delay policy with exponential growth and jitter.
//!
//! `delay = min(max, min * growth^min(attempt, max_exponent) + jitter)`, where
//! jitter is drawn uniformly from `[0, jitter)`. Additive jitter keeps the
//! sequence non-decreasing in expectation while spreading simultaneous
//! reconnects from many front-ends.

use crate::config::BridgeDefaults;
use crate::{BridgeError, Result};
use rand::Rng;
use std::time::Duration;

/// Exponential backoff parameters for the primary transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub min: Duration,
    /// Cap applied after jitter.
    pub max: Duration,
    /// Growth factor per attempt (typically 2.0 for doubling).
    pub growth: f64,
    /// Attempt number beyond which the exponent stops growing.
    pub max_exponent: u32,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            min: BridgeDefaults::MIN_BACKOFF,
            max: BridgeDefaults::MAX_BACKOFF,
            growth: BridgeDefaults::BACKOFF_GROWTH,
            max_exponent: BridgeDefaults::BACKOFF_MAX_EXPONENT,
            jitter: BridgeDefaults::BACKOFF_JITTER,
        }
    }
}

impl ReconnectBackoff {
    /// Create a backoff policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum (first) delay.
    pub fn with_min(mut self, delay: Duration) -> Self {
        self.min = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max(mut self, delay: Duration) -> Self {
        self.max = delay;
        self
    }

    /// Set the growth factor.
    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    /// Set the attempt number beyond which the delay stops growing.
    pub fn with_max_exponent(mut self, max_exponent: u32) -> Self {
        self.max_exponent = max_exponent;
        self
    }

    /// Set the jitter bound. `Duration::ZERO` disables jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a given attempt number (0-indexed), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let mut rng = rand::rng();
            Duration::from_secs_f64(rng.random_range(0.0..self.jitter.as_secs_f64()))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for a given attempt number with an explicit jitter sample.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.min(self.max_exponent) as i32;
        let base_secs = self.min.as_secs_f64() * self.growth.powi(exponent);
        let total_secs = (base_secs + jitter.as_secs_f64()).min(self.max.as_secs_f64());
        // `max` may sit beyond what an f64 round-trips exactly
        Duration::try_from_secs_f64(total_secs).unwrap_or(self.max)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.min.is_zero() || self.max < self.min {
            return Err(BridgeError::Config {
                message: format!(
                    "reconnect backoff requires 0 < min <= max (min={:?}, max={:?})",
                    self.min, self.max
                ),
            });
        }
        if !(self.growth >= 1.0 && self.growth.is_finite()) {
            return Err(BridgeError::Config {
                message: format!("reconnect growth factor must be >= 1.0, got {}", self.growth),
            });
        }
        Ok(())
    }
}
