/*!
 * Retry Policy
 *
 * Uniform bounded retry with exponential backoff for external calls.
 * The policy is injected into every wrapper that retries, so backoff
 * behavior can be tested without the business logic around it.
 */

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Bounded retry with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

/// Outcome of an exhausted or aborted retry loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempt(s)")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure")]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Fatal(_) => 1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// `attempts` tries with no delay between them (testing)
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Recursive dataset destruction: a few quick retries, busy mounts settle fast
    pub fn storage_destroy() -> Self {
        Self::new(
            crate::core::limits::STORAGE_DESTROY_ATTEMPTS,
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
    }

    /// Mesh enrollment: slow service, tens of seconds per attempt
    pub fn enrollment() -> Self {
        Self::new(
            crate::core::limits::ENROLL_ATTEMPTS,
            Duration::from_secs(2),
            Duration::from_secs(30),
        )
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Run `op` until it succeeds, fails fatally or attempts run out
    ///
    /// `op` receives the 1-based attempt number. Errors for which
    /// `is_retryable` returns false abort immediately.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(_) => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<&str>> = RetryPolicy::immediate(3)
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err("busy")
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_attempts() {
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run(|_| async { Err::<(), _>("busy") }, |_| true)
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last: "busy"
            })
        );
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("denied") }
                },
                |e| *e != "denied",
            )
            .await;

        assert_eq!(result, Err(RetryError::Fatal("denied")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        let _ = policy
            .run(|_| async { Err::<(), _>(()) }, |_| true)
            .await;
        // 2s before attempt 2, 4s before attempt 3
        assert!(start.elapsed() >= Duration::from_secs(6));
    }
}
