//! Client-side retry policy.
//!
//! Encodes which request errors are worth retrying automatically. Only
//! `RateLimited` is; the wait honours the server's `retry_after_ms` and
//! adds exponential backoff with full jitter so that many clients do not
//! retry in lockstep.

use crate::domain::error::GuardError;
use rand::Rng;
use std::time::Duration;

#[cfg(feature = "async")]
use std::future::Future;

/// Retry schedule for rate-limited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first
    pub max_attempts: u32,
    /// Backoff ceiling before the first retry
    pub base_delay: Duration,
    /// Upper bound of the backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next attempt, after `attempt` attempts failed with `error`.
    ///
    /// Returns `None` when the error is not retryable or attempts are exhausted.
    pub fn delay_for(&self, attempt: u32, error: &GuardError) -> Option<Duration> {
        self.delay_for_with_rng(attempt, error, &mut rand::thread_rng())
    }

    /// Same as [`RetryPolicy::delay_for`] with a caller-supplied RNG.
    pub fn delay_for_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        error: &GuardError,
        rng: &mut R,
    ) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let retry_after = match error {
            GuardError::RateLimited { retry_after_ms } => Duration::from_millis(*retry_after_ms),
            _ => return None,
        };

        let ceiling = self.backoff_ceiling(attempt);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        let jittered = Duration::from_millis(rng.gen_range(0..=ceiling_ms));

        Some(retry_after.max(jittered))
    }

    /// `base × 2^(attempt − 1)`, capped at `max_delay`.
    fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Drive `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
/// The last error returned by `op`.
#[cfg(feature = "async")]
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, GuardError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GuardError>>,
{
    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(delay) = policy.delay_for(attempt, &error) else {
            return Err(error);
        };
        tracing::debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying after rate limit"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::ValidationError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rate_limited(ms: u64) -> GuardError {
        GuardError::RateLimited { retry_after_ms: ms }
    }

    #[test]
    fn test_non_retryable_errors() {
        let policy = RetryPolicy::default();
        for error in [
            GuardError::VersionMismatch {
                expected: 1,
                actual: 2,
            },
            GuardError::InvalidInput(ValidationError::NotWhitelisted),
            GuardError::ValueOutOfRange { attempted: 1_000_001 },
            GuardError::NotFound {
                name: "global-counter".to_string(),
            },
            GuardError::blocked_for_ms(5_000),
        ] {
            assert_eq!(policy.delay_for(1, &error), None, "{}", error);
        }
    }

    #[test]
    fn test_attempts_exhausted() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(4, &rate_limited(10)).is_some());
        assert_eq!(policy.delay_for(5, &rate_limited(10)), None);
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(400));
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..10 {
            for _ in 0..50 {
                let delay = policy
                    .delay_for_with_rng(attempt, &rate_limited(30), &mut rng)
                    .unwrap();
                assert!(delay >= Duration::from_millis(30));
                assert!(delay <= Duration::from_millis(400));
            }
        }
    }

    #[test]
    fn test_server_hint_dominates() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        let delay = policy
            .delay_for_with_rng(1, &rate_limited(60_000), &mut rng)
            .unwrap();
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_ceiling() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_ceiling(64), Duration::from_millis(1_000));
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn test_retry_async_until_success() {
        let policy = RetryPolicy::default();

        let result = retry_async(&policy, |attempt| async move {
            if attempt < 3 {
                Err(rate_limited(10))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn test_retry_async_stops_on_conflict() {
        let policy = RetryPolicy::default();
        let mut calls = 0;

        let result: Result<(), _> = retry_async(&policy, |_| {
            calls += 1;
            async {
                Err(GuardError::VersionMismatch {
                    expected: 0,
                    actual: 1,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(GuardError::VersionMismatch { .. })));
        assert_eq!(calls, 1);
    }
}
