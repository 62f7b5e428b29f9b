use convoy_core::{ConvoyError, ConvoyResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configures retry behaviour for an outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay in milliseconds before the second attempt.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub max_delay_ms: u64,
    /// Fraction (0..=1) of each delay added or removed at random.
    pub jitter: f64,
    /// Deadline in milliseconds for a single attempt.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter: 0.1,
            timeout_ms: 30_000,
        }
    }
}

/// Computes the un-jittered delay after the given failed attempt (1-based):
/// `min(initial_delay * 2^(attempt-1), max_delay)`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let delay = policy
        .initial_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    delay.min(policy.max_delay_ms)
}

fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = compute_backoff(policy, attempt) as f64;
    let jitter = policy.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return Duration::from_secs_f64(base / 1000.0);
    }
    let spread = base * jitter;
    let offset = rand::thread_rng().gen_range(-1.0..=1.0) * spread;
    Duration::from_secs_f64((base + offset).max(0.0) / 1000.0)
}

/// Run `op` until it succeeds or `max_attempts` is exhausted, retrying every error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> ConvoyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConvoyResult<T>>,
{
    with_retry_if(policy, op, |_| true).await
}

/// Like [`with_retry`], but gives up at once when `should_retry` rejects an error.
///
/// Each attempt races the operation against `timeout_ms`; a lost race fails the
/// attempt with [`ConvoyError::Timeout`]. The last error is returned unchanged.
pub async fn with_retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> ConvoyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConvoyResult<T>>,
    P: Fn(&ConvoyError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let deadline = Duration::from_millis(policy.timeout_ms);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(deadline, op()).await {
            Ok(result) => result,
            Err(_) => Err(ConvoyError::Timeout {
                timeout_ms: policy.timeout_ms,
            }),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(attempts = max_attempts, error = %err, "Failed after all attempts");
            return Err(err);
        }
        if !should_retry(&err) {
            warn!(attempt, error = %err, "Non-retryable error, giving up");
            return Err(err);
        }

        let delay = jittered_delay(policy, attempt);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
