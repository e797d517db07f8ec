use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// How the delay grows between consecutive retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffPolicy {
    /// `base * (retry + 1)`: the policy used between failed sync passes.
    #[default]
    Linear,
    /// `base * 2^retry`: used for individual API calls.
    Exponential,
}

/// Backoff configuration with optional jitter so concurrent callers hitting
/// the same transient failure do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub policy: BackoffPolicy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
            policy: BackoffPolicy::Exponential,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy applied between failed sync passes: linear, no jitter.
    pub fn sync_pass(max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay_secs,
            max_delay_secs: base_delay_secs.saturating_mul(u64::from(max_retries.max(1))),
            policy: BackoffPolicy::Linear,
            jitter: false,
        }
    }

    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(growth(base, retry), max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let grown = match self.policy {
            BackoffPolicy::Linear => self
                .base_delay_secs
                .saturating_mul(u64::from(retry).saturating_add(1)),
            BackoffPolicy::Exponential => self
                .base_delay_secs
                .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX)),
        };
        let capped = grown.min(self.max_delay_secs);
        let jitter = if self.jitter && self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }
}

/// Retry an async operation with backoff.
///
/// - `config`: retry configuration
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error if retries are exhausted
/// or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1; // 1 initial + max_retries retries
    let mut attempt = 0;

    loop {
        let e = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        attempt += 1;
        if classifier(&e) == RetryAction::Abort || attempt >= total_attempts {
            return Err(e);
        }
        let delay = config.delay_for_retry(attempt - 1);
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}s: {}",
            attempt,
            total_attempts,
            delay.as_secs(),
            e
        );
        tokio::time::sleep(delay).await;
    }
}
