//! Rate-limit retry policy with exponential backoff.

use crate::ProviderError;
use log::warn;
use spark_rs_config::ProviderConfig;
use std::future::Future;
use std::time::Duration;

/// Attempt budget and backoff bounds for rate-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    ///
    /// `base × 2^attempt`, capped by the provider hint when present and by
    /// `max_backoff`.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let mut delay = self.base_backoff.saturating_mul(factor);
        if let Some(hint) = hint {
            delay = delay.min(hint);
        }
        delay.min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with anything other than a rate
    /// limit, or the attempt budget is spent. `exhausted` builds the error
    /// returned in the last case.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        exhausted: impl Fn(u32) -> ProviderError,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(ProviderError::RateLimited { retry_after }) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(exhausted(attempt));
                    }
                    let delay = self.delay(attempt - 1, retry_after);
                    warn!(
                        "{label} rate limited; backing off (attempt={attempt}, delay_ms={})",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.delay(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay(1, None), Duration::from_millis(200));
        assert_eq!(policy.delay(2, None), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_by_hint_and_maximum() {
        let policy = policy();
        assert_eq!(
            policy.delay(2, Some(Duration::from_millis(150))),
            Duration::from_millis(150)
        );
        assert_eq!(policy.delay(8, None), Duration::from_millis(1_000));
        assert_eq!(policy.delay(40, None), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn run_stops_after_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProviderError::RateLimited { retry_after: None }) }
                },
                |attempts| ProviderError::GenerationExhausted { attempts },
            )
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::GenerationExhausted { attempts: 3 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProviderError::Generation("bad".to_string())) }
                },
                |attempts| ProviderError::GenerationExhausted { attempts },
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Generation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
