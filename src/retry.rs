//! Bounded retry with a configurable pause between attempts
//!
//! The default policy pauses a fixed interval between attempts. Setting
//! `backoff_multiplier` above 1.0 grows the pause exponentially up to
//! `max_backoff`, and `jitter` spreads concurrent retries apart.
//!
//! # Example
//!
//! ```no_run
//! use tripdata_loader::retry::{IsRetryable, retry_with_backoff};
//! use tripdata_loader::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let result = retry_with_backoff(&config, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::UploadError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, missing object after upload) should return `true`.
/// Failures that no retry can fix (access denied) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::Store(e) => !e.is_fatal(),
            UploadError::VerificationMismatch { .. } | UploadError::StaleObject { .. } => true,
        }
    }
}

/// Why a retried operation did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    Exhausted {
        /// Error from the final attempt
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// An attempt failed with a non-retryable error
    Permanent {
        /// The non-retryable error
        error: E,
        /// Attempts made, including the failing one
        attempts: u32,
    },
    /// Cancellation was signalled while waiting to retry
    Cancelled {
        /// Error from the last attempt
        last_error: E,
        /// Attempts made
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// Execute an async operation, retrying retryable failures
///
/// `operation` receives the 1-based attempt number. At most `config.max_attempts`
/// attempts are made. Between attempts the task sleeps; if `cancel` fires during the
/// sleep no further attempt is started.
///
/// Returns the value and the attempt number that produced it.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.backoff;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok((result, attempt));
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(error = %e, attempt, "Operation failed with non-retryable error");
                return Err(RetryError::Permanent {
                    error: e,
                    attempts: attempt,
                });
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    error: e,
                    attempts: attempt,
                });
            }
            Err(e) => {
                let pause = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = pause.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(attempts = attempt, "Retry abandoned: cancellation requested");
                        return Err(RetryError::Cancelled {
                            last_error: e,
                            attempts: attempt,
                        });
                    }
                    _ = tokio::time::sleep(pause) => {}
                }

                delay = next_delay(config, delay);
            }
        }
    }
}

fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    if config.backoff_multiplier <= 1.0 {
        return delay;
    }
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_backoff)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast(3), &CancellationToken::new(), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), (42, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let result = retry_with_backoff(&fast(3), &CancellationToken::new(), |attempt| async move {
            if attempt < 3 {
                Err(TestError::Transient)
            } else {
                Ok(attempt * 10)
            }
        })
        .await;

        assert_eq!(result.unwrap(), (30, 3));
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_bound() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast(4), &CancellationToken::new(), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast(5), &CancellationToken::new(), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_retrying() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff: Duration::from_secs(30),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = retry_with_backoff(&config, &cancel, |_| {
            trigger.cancel();
            async { Err::<(), _>(TestError::Transient) }
        })
        .await;

        match result {
            Err(RetryError::Cancelled { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_backoff_does_not_grow() {
        let config = RetryConfig::default();
        assert_eq!(next_delay(&config, config.backoff), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig {
            backoff: Duration::from_secs(10),
            backoff_multiplier: 4.0,
            max_backoff: Duration::from_secs(25),
            ..Default::default()
        };
        assert_eq!(next_delay(&config, Duration::from_secs(10)), Duration::from_secs(25));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_secs(1);
        for _ in 0..50 {
            let jittered = add_jitter(base);
            assert!(jittered >= base && jittered <= base * 2);
        }
    }

    #[test]
    fn upload_errors_classify_fatal_store_errors_as_permanent() {
        let denied = UploadError::Store(StoreError::PermissionDenied {
            target: "trips".into(),
            reason: "403".into(),
        });
        let mismatch = UploadError::VerificationMismatch {
            key: "k".into(),
            expected: 1,
            found: None,
        };
        assert!(!denied.is_retryable());
        assert!(mismatch.is_retryable());
    }
}
