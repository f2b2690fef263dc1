//! Bounded retry with linearly increasing backoff for remote writes.

use std::future::Future;
use std::time::Duration;

/// Terminal failure: the last error after every attempt was used.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait after the failed attempt with zero-based index `attempt`:
    /// `base_delay * (attempt + 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }

    /// Run `op` until it succeeds or `max_attempts` calls have failed.
    ///
    /// `label` names the operation in log fields.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let attempts = attempt + 1;
                    if attempts >= max_attempts {
                        tracing::warn!(op = label, attempts, error = %err, "retries exhausted");
                        return Err(RetryError {
                            attempts,
                            last: err,
                        });
                    }
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        op = label,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "remote operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_default_schedule_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_first_success_makes_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, RetryError<String>> = fast()
            .run("op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = fast()
            .run("op", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("fail {}", n)) } else { Ok(n) }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_makes_exactly_max_attempts_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), RetryError<String>> = fast()
            .run("op", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(format!("fail {}", n))
                }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "fail 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_waits_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(20));
        let started = tokio::time::Instant::now();
        let _: Result<(), RetryError<&str>> = policy.run("op", || async { Err("down") }).await;
        // 20ms + 40ms of backoff; no wait after the final attempt.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
