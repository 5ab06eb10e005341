//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient failures. It
//! implements exponential backoff with optional jitter. Errors can additionally
//! declare that a failed attempt should not count against the budget, which the
//! session login uses for unreachable-server and timeout errors.
//!
//! # Example
//!
//! ```no_run
//! use batchdl::retry::{IsRetryable, retry_with_backoff};
//! use batchdl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = retry_with_backoff(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns false if a retry caused by this error should not use up an attempt
    fn consumes_attempt(&self) -> bool {
        true
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Every login failure gets another chance until the budget runs out
            Error::Session { .. } => true,
            Error::Io(e) => is_transient_io(e),
            Error::Search(_) => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::Collaborator(_) | Error::Hook(_) => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }

    fn consumes_attempt(&self) -> bool {
        match self {
            Error::Session { transient, .. } => !transient,
            Error::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::AddrNotAvailable
            ),
            _ => true,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` counts retries after the first attempt. Failures whose
/// error reports `consumes_attempt() == false` are retried without touching the
/// budget.
///
/// Returns the successful result or the last error after all retry attempts are
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && (!e.consumes_attempt() || attempt < config.max_attempts) => {
                if e.consumes_attempt() {
                    attempt += 1;
                }

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Free,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Free => write!(f, "free error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Permanent)
        }

        fn consumes_attempt(&self) -> bool {
            !matches!(self, TestError::Free)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(2), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "initial attempt + 2 retries");
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn free_failures_do_not_use_the_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        // Four free failures, then one counted failure, then success: a budget of
        // one retry is enough.
        let result = retry_with_backoff(&fast_config(1), || {
            let counter = counter_clone.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0..=3 => Err(TestError::Free),
                    4 => Err(TestError::Transient),
                    _ => Ok(7),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_are_capped() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let start = tokio::time::Instant::now();

        let _ = retry_with_backoff(&config, || async { Err::<(), _>(TestError::Transient) }).await;

        // 100 + 200 + 250 + 250
        assert_eq!(start.elapsed(), Duration::from_millis(800));
    }

    #[test]
    fn add_jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..200 {
            let d = add_jitter(base);
            assert!(d >= base && d <= base * 2, "jittered delay {d:?} out of range");
        }
    }

    #[test]
    fn session_errors_classification() {
        let transient = Error::session_transient("timed out");
        assert!(transient.is_retryable());
        assert!(!transient.consumes_attempt());

        let rejected = Error::session("invalid password");
        assert!(rejected.is_retryable());
        assert!(rejected.consumes_attempt());
    }

    #[test]
    fn io_timeout_is_free_but_reset_is_counted() {
        let timeout = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(timeout.is_retryable());
        assert!(!timeout.consumes_attempt());

        let reset = Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "r"));
        assert!(reset.is_retryable());
        assert!(reset.consumes_attempt());

        let denied = Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "d"));
        assert!(!denied.is_retryable());
    }

    #[test]
    fn engine_errors_are_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Other("x".into()).is_retryable());
        assert!(!Error::Collaborator("x".into()).is_retryable());
    }
}
