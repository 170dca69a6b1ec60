use crate::config::types::RetryConfig;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Exponential backoff schedule with optional attempt and wall-time caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_total: Some(config.max_total),
        }
    }

    /// Retries forever; only the delay schedule applies.
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
            max_total: None,
        }
    }

    /// Delay after the given failed attempt (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Failure<E> {
    /// Worth trying again
    Transient(E),
    /// Trying again with the same input cannot succeed
    Permanent(E),
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("permanent failure: {0}")]
    Permanent(E),

    #[error("gave up after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: E,
    },
}

/// Run `operation` until it succeeds, fails permanently, or the policy is spent.
///
/// `on_retry` is called before each backoff sleep with the failed attempt
/// number, its error and the upcoming delay.
pub async fn attempt_with_policy<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    R: FnMut(u32, &E, Duration),
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(Failure::Permanent(e)) => return Err(RetryError::Permanent(e)),
            Err(Failure::Transient(e)) => e,
        };

        let delay = policy.delay_for(attempt);
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempt >= max);
        let out_of_time = policy
            .max_total
            .is_some_and(|max_total| started.elapsed() + delay > max_total);

        if out_of_attempts || out_of_time {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                elapsed: started.elapsed(),
                last: error,
            });
        }

        on_retry(attempt, &error, delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: Option<u32>, max_total: Option<Duration>) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_total,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: None,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_total: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result: Result<&str, RetryError<String>> = attempt_with_policy(
            &fast_policy(Some(5), None),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Failure::Transient(format!("boom {}", attempt)))
                    } else {
                        Ok("done")
                    }
                }
            },
            |attempt, _err, _delay| retries.push(attempt),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<&str>> = attempt_with_policy(
            &fast_policy(Some(5), None),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::Permanent("bad payload")) }
            },
            |_, _, _| {},
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent("bad payload"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let result: Result<(), RetryError<&str>> = attempt_with_policy(
            &fast_policy(Some(3), None),
            |_| async { Err(Failure::Transient("down")) },
            |_, _, _| {},
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "down");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausts_time_budget() {
        let policy = RetryPolicy {
            max_attempts: None,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            max_total: Some(Duration::from_millis(50)),
        };

        let started = Instant::now();
        let result: Result<(), RetryError<&str>> =
            attempt_with_policy(&policy, |_| async { Err(Failure::Transient("down")) }, |_, _, _| {}).await;

        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
