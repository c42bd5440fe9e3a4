//! Backoff between resends of unprocessed operations
//!
//! Exponential growth from `initial_delay`, capped at `max_delay`, with
//! optional full jitter (uniform in `[0, backoff]`) drawn from the injected
//! [`Rng`] so simulation runs stay reproducible.

use crate::io::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff before the first resend (default: 50ms)
    #[serde(with = "crate::config::duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound on any single backoff (default: 2s)
    #[serde(with = "crate::config::duration_millis")]
    pub max_delay: Duration,
    /// Randomize each delay over `[0, backoff]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Resend immediately, no backoff
    pub fn immediate() -> Self {
        RetryConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Configuration for tests (short, deterministic delays)
    pub fn test() -> Self {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter: false,
        }
    }

    /// Un-jittered backoff before resend number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let initial_us = self.initial_delay.as_micros() as u64;
        let max_us = self.max_delay.as_micros() as u64;
        let factor = 1u64.checked_shl(retry.min(63)).unwrap_or(u64::MAX);
        Duration::from_micros(initial_us.saturating_mul(factor).min(max_us))
    }

    /// Delay to sleep before resend number `retry` (0-based)
    pub fn delay<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let backoff = self.backoff(retry);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let ceiling = backoff.as_micros() as u64;
        Duration::from_micros(rng.gen_range(0, ceiling.saturating_add(1)))
    }
}
