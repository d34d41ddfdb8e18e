//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;

/// Retry budget for a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff, including provider retry-after hints.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Final error of a retried call and how many attempts were spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: ProviderError,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before attempt `retry + 1` (`retry` starts at 1).
    ///
    /// Throttling hints are honoured (capped, +/-10% jitter); otherwise the
    /// delay is `base * 2^(retry-1)` capped, with equal jitter.
    pub fn backoff(&self, retry: u32, error: &ProviderError) -> Duration {
        use rand::Rng;

        if let Some(retry_after) = error.retry_after() {
            let capped = retry_after.min(self.max_delay());
            let base_ms = capped.as_millis() as u64;
            let jitter_factor: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
            let jittered_ms = ((base_ms as f64) * jitter_factor).round() as u64;
            return Duration::from_millis(jittered_ms.min(self.max_delay_ms));
        }

        let exp = retry.saturating_sub(1).min(20);
        let base_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let half = base_ms / 2;
        let jittered_ms = half + rand::thread_rng().gen_range(0..=base_ms - half);
        Duration::from_millis(jittered_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok((value, attempts)),
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let backoff = self.backoff(attempts, &e);
                    warn!(
                        call = label,
                        error = %e,
                        retry = attempts,
                        max_attempts = max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying provider call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return Err(RetryFailure { error, attempts }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(250));
        let err = ProviderError::Transient {
            message: "x".into(),
        };
        for retry in 1..10 {
            assert!(policy.backoff(retry, &err) <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(60));
        let err = ProviderError::Transient {
            message: "x".into(),
        };
        // equal jitter keeps each delay within [base/2, base]
        assert!(policy.backoff(1, &err) <= Duration::from_millis(100));
        assert!(policy.backoff(4, &err) >= Duration::from_millis(400));
    }

    #[test]
    fn test_retry_after_hint_capped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let err = ProviderError::Throttled {
            retry_after: Some(Duration::from_secs(120)),
        };
        assert!(policy.backoff(1, &err) <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::Throttled { retry_after: None })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(("ok", 3)));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Unauthorized {
                        message: "expired".into(),
                    })
                }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Transient {
                        message: "503".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
