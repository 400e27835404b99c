//! Bounded retry of transient remote failures.
//!
//! Only errors that report themselves as retryable are retried; permanent and
//! unknown failures surface on the first attempt.

use crate::errors::OrchestratorError;
use crate::remote::RemoteError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed delay as is.
    None,
    /// Uniform in `0..=delay`.
    #[default]
    Full,
    /// Half fixed, half uniform.
    Equal,
}

/// Retry limits for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 20_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates the default retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Computes the delay before retry number `retry` (0 = first retry).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let raw = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        };
        let capped = raw.min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full if capped == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=capped),
            JitterStrategy::Equal => {
                let half = capped / 2;
                if half == 0 {
                    capped
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Returns true if the operation may be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for OrchestratorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote(_))
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent. The last error is returned unchanged.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_transient<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt - 1);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(operation = label, attempt, error = %e, "Retry budget exhausted");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.jitter, JitterStrategy::Full);
        assert_eq!(RetryConfig::disabled().max_attempts, 1);
    }

    #[test]
    fn test_max_attempts_never_zero() {
        assert_eq!(RetryConfig::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_delay_exponential() {
        let config = no_jitter();
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_linear_and_constant() {
        let linear = no_jitter().with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = no_jitter().with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped() {
        let config = no_jitter().with_max_delay_ms(500);
        assert_eq!(config.delay_for(20), Duration::from_millis(500));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        for _ in 0..20 {
            assert!(config.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_equal_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Equal);
        for _ in 0..20 {
            let d = config.delay_for(0);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, RemoteError> = retry_transient(&no_jitter(), "op", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::new("ThrottlingException", "slow down"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = no_jitter().with_max_attempts(3);

        let result: Result<(), RemoteError> = retry_transient(&config, "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::new("ServiceUnavailableException", "down"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().code, "ServiceUnavailableException");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), RemoteError> = tokio_test::block_on(retry_transient(&no_jitter(), "op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::new("AccessDeniedException", "no"))
            }
        }));

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
