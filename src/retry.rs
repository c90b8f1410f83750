//! Retry policy for explorer calls that come back `RetryNeeded`.
//!
//! The default reproduces the reference crawler: a fixed one-second pause,
//! retried without limit. Exponential growth, jitter and an attempt cap are
//! opt-in through configuration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How the delay grows between consecutive retries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time
    #[default]
    Fixed,
    /// `base * factor^(n-1)`, capped at `max_delay_ms`
    Exponential { factor: u32, max_delay_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Random spread applied to each delay, in percent of the delay
    #[serde(default)]
    pub jitter_percent: u64,

    /// Consecutive failures tolerated per address; `None` retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            jitter_percent: 0,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, unlimited retries
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == Some(0) {
            anyhow::bail!("retry.max_attempts must be > 0 when set");
        }
        if self.jitter_percent > 100 {
            anyhow::bail!("retry.jitter_percent must be <= 100");
        }
        if let Backoff::Exponential { factor, .. } = self.backoff {
            if factor == 0 {
                anyhow::bail!("retry.backoff.factor must be > 0");
            }
        }
        Ok(())
    }

    /// True once `failures` consecutive failures have used up the budget
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }

    /// Delay before the retry that follows the `failures`-th consecutive failure
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential {
                factor,
                max_delay_ms,
            } => {
                let exponent = failures.saturating_sub(1);
                let multiplier = (factor as u64).saturating_pow(exponent);
                self.base_delay_ms
                    .saturating_mul(multiplier)
                    .min(max_delay_ms)
            }
        };

        if self.jitter_percent == 0 || base == 0 {
            return Duration::from_millis(base);
        }

        // Clamp so the signed arithmetic below cannot wrap
        let base = base.min(i64::MAX as u64 / 2);
        let spread = (base as u128 * self.jitter_percent.min(100) as u128 / 100) as i64;
        let jitter: i64 = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base as i64).saturating_add(jitter).max(0) as u64)
    }
}

/// Sleep for `delay` unless the token fires first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
