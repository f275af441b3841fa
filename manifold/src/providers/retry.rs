//! Shared retry helper for upstream calls.
//!
//! All providers run their HTTP attempts through one [`RetryPolicy`]. The
//! policy holds no mutable state; classification of what is retryable
//! lives on [`ProviderError::is_retryable`].

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use super::error::ProviderError;

/// Exponential backoff with jitter and a `Retry-After` override.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on a computed backoff delay.
    pub max_delay: Duration,
    /// Upper bound honoured for upstream `Retry-After` hints.
    pub retry_after_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_after_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// The delay before retry number `retry` (zero-based).
    ///
    /// A numeric `Retry-After` hint overrides the computed backoff but is
    /// still capped. Computed delays are `base * 2^retry`, capped, plus up
    /// to 25% jitter.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs).min(self.retry_after_cap);
        }
        let exponential = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(retry))
            .min(self.max_delay);
        exponential + exponential.mul_f64(fastrand::f64() * 0.25)
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts are
    /// exhausted. The closure receives the zero-based attempt number.
    ///
    /// # Errors
    ///
    /// The last [`ProviderError`] observed.
    pub async fn run<T, F, Fut>(&self, model: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let mut attempt = 0_u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let next_attempt = attempt + 1;
                    if !err.is_retryable() || next_attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt, err.retry_after());
                    warn!(
                        model,
                        attempt = next_attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn http(status: u16, retry_after: Option<u64>) -> ProviderError {
        ProviderError::Http {
            status,
            body: String::new(),
            retry_after,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_makes_one_call() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = policy
            .run("m", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ProviderError>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_retried_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let err = policy
            .run("m", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(http(503, None)) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, ProviderError::Http { status: 503, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_makes_exactly_one_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let err = policy
            .run("m", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ProviderError::RateLimited {
                        retry_after: Some(7),
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.retry_after(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = policy
            .run("m", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ProviderError::Network("reset".to_owned()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_http_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let err = policy
            .run("m", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(http(401, None)) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
    }

    #[test]
    fn backoff_is_exponential_capped_and_jittered() {
        let policy = RetryPolicy::default();
        for retry in 0..6 {
            let base = Duration::from_secs(1)
                .saturating_mul(2_u32.pow(retry))
                .min(policy.max_delay);
            let delay = policy.backoff_delay(retry, None);
            assert!(delay >= base, "retry {retry}: {delay:?} < {base:?}");
            assert!(
                delay <= base + base.mul_f64(0.25),
                "retry {retry}: {delay:?} above jitter bound"
            );
        }
    }

    #[test]
    fn retry_after_overrides_backoff_but_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0, Some(7)), Duration::from_secs(7));
        assert_eq!(policy.backoff_delay(0, Some(600)), Duration::from_secs(60));
    }
}
