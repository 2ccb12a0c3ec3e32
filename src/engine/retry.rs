//! Bounded retry with exponential backoff and jitter.
//!
//! `max_retries` is the total number of attempts. Between attempts the
//! executor sleeps `base * 2^attempt_index`, capped at `max_delay`, with a
//! symmetric random jitter of `jitter * delay` so callers failing together do
//! not retry in lockstep.

use crate::types::{self, Error, ErrorCode};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub max_delay: Duration,

    /// Jitter ratio in `[0, 1]`; 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Deterministic policy, handy for tests and benches.
    pub fn fixed(base_delay: Duration) -> Self {
        Self {
            base_delay,
            jitter: 0.0,
            ..Self::default()
        }
    }
}

/// Runs an async operation until it succeeds, fails permanently or runs out
/// of attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` up to `max_retries` times (at least once).
    ///
    /// Non-retryable errors are returned unchanged on the attempt that raised
    /// them. Exhausting the budget yields `MAX_RETRIES_EXCEEDED` wrapping the
    /// last error; it is never retryable.
    pub async fn run<F, Fut, T>(&self, mut operation: F, max_retries: u32) -> types::Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = types::Result<T>>,
    {
        let attempts = max_retries.max(1);
        let mut attempt = 0;

        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.retryable {
                return Err(err);
            }

            attempt += 1;
            if attempt >= attempts {
                let last_code = err.code;
                return Err(Error::new(
                    ErrorCode::MaxRetriesExceeded,
                    format!("Max retries exceeded after {} attempts: {}", attempt, err.message),
                    false,
                )
                .with_context(serde_json::json!({
                    "attempts": attempt,
                    "last_code": last_code,
                }))
                .with_cause(err));
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(
                "retry_scheduled: attempt={}/{}, delay_ms={}, error={}",
                attempt + 1,
                attempts,
                delay.as_millis(),
                err,
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let base = self.exponential(attempt_index);
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let spread = base.as_secs_f64() * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }

    fn exponential(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay)
    }

    /// Upper bound on total sleep across `max_retries` attempts, ignoring jitter.
    pub fn max_total_wait(&self, max_retries: u32) -> Duration {
        (0..max_retries.max(1) - 1).map(|i| self.exponential(i)).sum()
    }
}
