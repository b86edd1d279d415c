use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Message fragments that mark an error as transient. Matched case-insensitively.
const RETRYABLE_PATTERNS: [&str; 9] = [
    "network",
    "timeout",
    "connection",
    "rate limit",
    "temporary",
    "server error",
    "502",
    "503",
    "504",
];

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    /// Delay to wait after failed attempt `attempt` (1-based) before the next one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        let delay = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(delay.round() as u64)
    }

    fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of [`retry_operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Success { data: T, attempts: u32 },
    Failure { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure { error, .. } => Err(error),
        }
    }
}

/// Runs `operation` until it succeeds or `max_attempts` is exhausted.
///
/// Attempts run one after another. Between a failed attempt and the next one the
/// helper sleeps for [`RetryOptions::delay_for_attempt`]; there is no sleep after
/// the final attempt. Only the last error is kept.
pub async fn retry_operation<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.effective_attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(data) => {
                return RetryOutcome::Success {
                    data,
                    attempts: attempt,
                };
            }
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::warn!(attempts = attempt, %error, "Operation failed on final attempt");
                    return RetryOutcome::Failure {
                        error,
                        attempts: max_attempts,
                    };
                }

                let delay = options.delay_for_attempt(attempt);
                tracing::info!(
                    "Attempt {} failed, retrying in {}ms: {}",
                    attempt,
                    delay.as_millis(),
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Whether an error message looks transient. Only used to pick user-facing wording.
pub fn is_retryable_error(error: &impl fmt::Display) -> bool {
    let message = error.to_string().to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// User-facing summary of a failed retry sequence, e.g. "Payment failed: ...".
pub fn failure_message(action: &str, error: &impl fmt::Display, attempts: u32) -> String {
    if is_retryable_error(error) {
        format!(
            "{action} failed after {attempts} attempts. This appears to be a temporary issue. Please try again."
        )
    } else {
        format!("{action} failed: {error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn options(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }

    /// Fails `failures` times, then returns the attempt number. Records when each call started.
    fn flaky(
        failures: u32,
        calls: Arc<AtomicU32>,
        starts: Arc<Mutex<Vec<Instant>>>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, String>> + Send>> {
        move || {
            let calls = calls.clone();
            let starts = starts.clone();
            Box::pin(async move {
                starts.lock().unwrap().push(Instant::now());
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(format!("network error on call {n}"))
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[test]
    fn test_delay_sequence_clamps_to_max() {
        let opts = options(10);
        assert_eq!(opts.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(opts.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(opts.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(opts.delay_for_attempt(5), Duration::from_millis(8000));
        assert_eq!(opts.delay_for_attempt(4000), Duration::from_millis(8000));
    }

    #[test]
    fn test_default_options() {
        let opts = RetryOptions::default();
        assert_eq!(opts.max_attempts, 3);
        assert_eq!(opts.base_delay_ms, 1000);
        assert_eq!(opts.max_delay_ms, 10_000);
        assert!((opts.backoff_multiplier - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let opts: RetryOptions = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.base_delay_ms, 1000);
        assert_eq!(opts.max_delay_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let outcome = retry_operation(flaky(2, calls.clone(), starts.clone()), &options(3)).await;

        assert_eq!(outcome, RetryOutcome::Success { data: 3, attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_makes_no_further_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let begin = Instant::now();
        let outcome = retry_operation(flaky(0, calls.clone(), starts.clone()), &options(5)).await;

        assert_eq!(outcome.attempts(), 1);
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now() - begin, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let outcome =
            retry_operation(flaky(u32::MAX, calls.clone(), starts.clone()), &options(3)).await;

        assert_eq!(
            outcome,
            RetryOutcome::Failure {
                error: "network error on call 3".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_between_attempts_follow_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let begin = Instant::now();
        let outcome =
            retry_operation(flaky(u32::MAX, calls.clone(), starts.clone()), &options(4)).await;
        assert_eq!(outcome.attempts(), 4);

        let starts = starts.lock().unwrap();
        let gaps: Vec<u128> = starts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000]);
        // No sleep after the final attempt.
        assert_eq!((Instant::now() - begin).as_millis(), 7000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let begin = Instant::now();
        let outcome =
            retry_operation(flaky(u32::MAX, calls.clone(), starts.clone()), &options(1)).await;

        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now() - begin, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let outcome =
            retry_operation(flaky(u32::MAX, calls.clone(), starts.clone()), &options(0)).await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&"Request TIMEOUT after 30s"));
        assert!(is_retryable_error(&"Network unreachable"));
        assert!(is_retryable_error(&"upstream returned 503"));
        assert!(is_retryable_error(&"Rate limit exceeded"));
        assert!(is_retryable_error(&"Internal Server Error"));
        assert!(!is_retryable_error(&"invalid signature"));
        assert!(!is_retryable_error(&"insufficient funds"));
    }

    #[test]
    fn test_failure_message_wording() {
        assert_eq!(
            failure_message("Payment", &"connection reset", 3),
            "Payment failed after 3 attempts. This appears to be a temporary issue. Please try again."
        );
        assert_eq!(
            failure_message("Order creation", &"invalid signature", 3),
            "Order creation failed: invalid signature"
        );
    }
}
