//! Retry policy for remote calls.

use std::time::Duration;

use rand::Rng;
use remote_repo_utils::humantime_serde;
use serde::{Deserialize, Serialize};

// A day; longer delays are treated as misconfiguration.
const MAX_DELAY_SECS: f64 = 86_400.0;

/// Delay between attempts: `min(initial * multiplier^attempt, max)`, plus up to
/// 25% random jitter when enabled.
///
/// The default is a fixed 200ms pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Backoff {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Backoff {
    /// Doubling backoff with jitter, capped at `max`.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// 1ms fixed delay without jitter, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(1),
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// Non-finite or negative settings fall back to safe values instead of
    /// panicking inside `Duration::from_secs_f64`.
    #[must_use]
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let multiplier = sanitize(self.multiplier).unwrap_or(1.0);
        let initial = sanitize(self.initial.as_secs_f64()).unwrap_or(0.0);
        let cap = sanitize(self.max.as_secs_f64()).map_or(MAX_DELAY_SECS, |m| m.min(MAX_DELAY_SECS));

        let raw = initial * multiplier.powi(exponent);
        let secs = if raw.is_finite() { raw.clamp(0.0, cap) } else { cap };
        let delay = Duration::from_secs_f64(secs);

        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(0.0..=0.25);
        let jittered = delay.as_secs_f64() * (1.0 + factor);
        Duration::from_secs_f64(jittered.min(MAX_DELAY_SECS))
    }
}

fn sanitize(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// How often a failed call is repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub retries: usize,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub fn fast(retries: usize) -> Self {
        Self {
            retries,
            backoff: Backoff::fast(),
        }
    }
}
