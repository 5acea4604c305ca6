//! Bounded exponential backoff for transient provider failures

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;

/// How often and how patiently to retry a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before attempt `failed_attempt + 1`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(failed_attempt.saturating_sub(1));
        let ms = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn wait_for(&self, failed_attempt: u32, err: &ProviderError) -> Duration {
        let base = self.delay_after(failed_attempt);
        let cap = Duration::from_millis(self.max_delay_ms);
        match err.retry_after {
            Some(hint) => hint.max(base).min(cap),
            None => base,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only [transient](ProviderError::is_transient) errors are retried. The
/// last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.wait_for(attempt, &err);
                warn!(
                    provider = %err.provider,
                    kind = %err.kind,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_after_respected_but_capped() {
        let policy = RetryPolicy::default();
        let err = ProviderError::new(ProviderErrorKind::RateLimit, "x", "slow down")
            .with_retry_after(Some(Duration::from_secs(5)));
        assert_eq!(policy.wait_for(1, &err), Duration::from_secs(5));
        let err = err.with_retry_after(Some(Duration::from_secs(60)));
        assert_eq!(policy.wait_for(1, &err), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::new(ProviderErrorKind::ServerError, "x", "500"))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::new(ProviderErrorKind::Auth, "x", "401"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::new(ProviderErrorKind::RateLimit, "x", "429"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::RateLimit);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
