//! Bounded exponential backoff for calls that cross a process boundary.
//!
//! Used around the classifier's model call and around persistence writes
//! that can lose an optimistic-concurrency race. The deterministic pipeline
//! stages never retry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `retries = 2` means at most 3 calls.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction in `[0, 1]` by which a delay may be randomly shortened.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Delay before retry number `retry`, shortened by a random share of up
    /// to `jitter`.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let cut = rand::thread_rng().gen_range(0.0..=jitter);
        base.mul_f64(1.0 - cut)
    }
}

/// Failure after the policy gave up.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::fmt::Display + std::fmt::Debug> {
    /// Total calls made, including the first.
    pub attempts: u32,
    /// True when the retry budget ran out; false when the last error was not
    /// retryable.
    pub exhausted: bool,
    /// The error returned by the final call.
    pub last: E,
}

impl<E: std::fmt::Display + std::fmt::Debug> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of retries.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(attempts, error = %e, "Non-retryable failure");
                    return Err(RetryError {
                        attempts,
                        exhausted: false,
                        last: e,
                    });
                }
                if attempts > policy.retries {
                    warn!(attempts, error = %e, "Retries exhausted");
                    return Err(RetryError {
                        attempts,
                        exhausted: true,
                        last: e,
                    });
                }
                let delay = policy.delay(attempts);
                debug!(attempts, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
