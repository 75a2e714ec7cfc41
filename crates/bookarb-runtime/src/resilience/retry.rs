//! Retry schedule for transient transport failures.
//!
//! The retry loop itself lives in the client facade so its interaction with
//! the circuit breaker stays visible; this module only owns the bound and
//! the delay sequence.

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "crate::config::humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "crate::config::humantime_serde")]
    pub max_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f32,

    /// Randomise delays to avoid synchronized retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delays to sleep between attempts; yields `max_attempts - 1` values.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);

        if self.jitter {
            builder = builder.with_jitter();
        }

        builder.build()
    }

    /// Delay to use after a failure that carried a provider `retry_after` hint.
    pub fn honour_hint(&self, scheduled: Duration, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.max(scheduled).min(self.max_delay),
            None => scheduled,
        }
    }
}
