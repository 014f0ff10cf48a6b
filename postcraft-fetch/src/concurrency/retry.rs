//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, Result};

/// How often and how patiently to retry transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retrying.
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Randomise each delay within `[delay / 2, delay]` so concurrent
    /// callers do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the total attempt count.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validates this policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FetchError::Config(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(FetchError::Config(
                "base_delay_ms must be <= max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Delay to wait after the failed attempt with 0-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let capped = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);
        let millis = if self.jitter && capped > 1 {
            rand::thread_rng().gen_range(capped / 2..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// Only failures for which [`FetchError::is_transient`] holds are retried;
/// validation and other permanent failures are returned immediately. After
/// `max_attempts` the last failure is surfaced.
pub async fn with_retry<T, F, Fut>(mut operation: F, policy: &RetryPolicy, label: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    label,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 0 {
                    tracing::warn!(label, attempts = attempt + 1, error = %err, "giving up");
                }
                return Err(err);
            }
        }
    }
}
