//! Async retry utilities with capped, jittered exponential backoff

use std::fmt;
use std::time::Duration;

use rand::Rng;

/// Backoff parameters for one class of operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Per-attempt timeout; an elapsed attempt counts as a transient failure
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed, before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exp);
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// Backoff with "equal jitter": uniformly in `[d/2, d]`
    fn jittered(&self, attempt: u32) -> Duration {
        let delay_ms = self.backoff(attempt).as_millis() as u64;
        if delay_ms < 2 {
            return Duration::from_millis(delay_ms);
        }
        let low = delay_ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(low..=delay_ms))
    }
}

/// Why a single attempt failed
#[derive(Debug)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::TimedOut(d) => write!(f, "attempt timed out after {}ms", d.as_millis()),
        }
    }
}

/// Final outcome of a retried operation that did not succeed
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: AttemptError<E>,
    pub attempts: u32,
    /// True when every attempt failed transiently and the budget ran out;
    /// false when a permanent error stopped retrying early.
    pub exhausted: bool,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

/// Retry an async operation, retrying only errors `is_transient` accepts.
///
/// Returns `Ok((value, attempts))` on success.
pub async fn retry_classified<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    is_transient: C,
    mut operation: F,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(AttemptError::Failed),
                Err(_) => Err(AttemptError::TimedOut(limit)),
            },
            None => operation().await.map_err(AttemptError::Failed),
        };

        let error = match outcome {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => e,
        };

        let transient = match &error {
            AttemptError::Failed(e) => is_transient(e),
            AttemptError::TimedOut(_) => true,
        };

        if !transient {
            return Err(RetryFailure {
                error,
                attempts,
                exhausted: false,
            });
        }
        if attempts >= max_attempts {
            return Err(RetryFailure {
                error,
                attempts,
                exhausted: true,
            });
        }

        let delay = policy.jittered(attempts);
        tracing::warn!(
            error = %error,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: None,
        }
    }

    fn always<E>(_: &E) -> bool {
        true
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: None,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: None,
        };
        for _ in 0..100 {
            let d = policy.jittered(3);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result = retry_classified(&fast_policy(3), always, || async { Ok::<_, &str>(7) }).await;
        assert_eq!(result.unwrap(), (7, 1));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_classified(&fast_policy(3), always, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient error")
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap().1, 2);
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result =
            retry_classified(&fast_policy(3), always, || async { Err::<(), _>("persistent") })
                .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted);
        assert!(matches!(failure.error, AttemptError::Failed("persistent")));
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_classified(
            &fast_policy(5),
            |e: &&str| *e != "auth",
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("auth")
                }
            },
        )
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            attempt_timeout: Some(Duration::from_millis(5)),
            ..fast_policy(2)
        };
        let result = retry_classified(&policy, always, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), &str>(())
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(failure.exhausted);
        assert!(matches!(failure.error, AttemptError::TimedOut(_)));
    }
}
