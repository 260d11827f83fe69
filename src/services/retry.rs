use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::services::platform::CallError;

/// Backoff policy for in-call retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied symmetrically, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// `min(max_delay, base_delay * 2^(attempt-1))`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with bounded random jitter, still capped at `max_delay`.
    /// Jitter fraction actually applied, in [0, 1]. NaN counts as none.
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter > 0.0 {
            self.jitter.min(1.0)
        } else {
            0.0
        }
    }

    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter = self.effective_jitter();
        if jitter == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. An open circuit is never retried here; the job
/// queue reschedules instead.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, CallError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let record = err.record();
                if err.is_circuit_open() || !record.retryable || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = policy.jittered_backoff(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error_kind = %record.kind,
                    "Retrying after backoff"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::RawError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(64), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_monotonic_and_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..Default::default()
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..policy.max_attempts {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.jittered_backoff(3).as_secs_f64();
            assert!((3.2..=4.8).contains(&delay), "delay {delay}");
        }
        for _ in 0..200 {
            assert!(policy.jittered_backoff(10) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_nan_or_negative_jitter_means_no_jitter() {
        for jitter in [f64::NAN, -0.5] {
            let policy = RetryPolicy {
                jitter,
                ..Default::default()
            };
            assert_eq!(policy.effective_jitter(), 0.0);
            assert_eq!(policy.jittered_backoff(3), Duration::from_secs(4));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = execute(&RetryPolicy::default(), move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CallError::Platform(RawError::with_status(503, "down")))
            } else {
                Ok("synced")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "synced");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = execute(&RetryPolicy::default(), move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Timeout(Duration::from_secs(1)))
        })
        .await;
        assert!(matches!(result, Err(CallError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = execute(&RetryPolicy::default(), move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Platform(RawError::with_status(422, "bad price")))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = execute(&RetryPolicy::default(), move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::CircuitOpen {
                key: "shopee".into(),
                retry_in: Duration::from_secs(5),
            })
        })
        .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_number_passed_to_operation() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let _: Result<(), _> = execute(&RetryPolicy::default(), |attempt| {
            seen.lock().push(attempt);
            async { Err(CallError::Platform(RawError::with_code("ECONNRESET", "reset"))) }
        })
        .await;
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }
}
