//! Retry and backoff controller.
//!
//! [`run_with_retry`] is the only place operations are retried. It re-checks a
//! precondition before every attempt, doubles the delay after each transient
//! failure up to the configured cap, and stops after `max_attempts`.
//! Non-transient errors end the loop immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::SyncError;
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// Default maximum attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay after the first failure.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
/// Default delay cap.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            with_jitter: false,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            with_jitter: false,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::InvalidRetry(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Build the exponential backoff strategy for this configuration.
    ///
    /// Yields one delay per gap between attempts, so `max_attempts - 1` in
    /// total.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    FatalFailure,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::TransientFailure => f.write_str("transient failure"),
            Self::FatalFailure => f.write_str("fatal failure"),
        }
    }
}

/// One pass through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAttempt {
    pub operation: String,
    /// 1-indexed.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Delay before the next attempt, if there will be one.
    pub backoff: Option<Duration>,
    pub detail: Option<String>,
}

/// Final result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The operation succeeded.
    Success { value: T, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last_error: String },
    /// The run was cancelled while waiting or before an attempt.
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts, or is
/// cancelled.
///
/// `precondition` is awaited before each attempt; an `Err(reason)` counts as a
/// transient failed attempt without calling `op`. Transient errors from `op`
/// are retried; any other error is returned as `Err` immediately.
pub async fn run_with_retry<T, P, PFut, F, Fut>(
    operation: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut precondition: P,
    mut op: F,
    on_progress: Option<&ProgressCallback>,
) -> Result<RetryOutcome<T>, SyncError>
where
    P: FnMut() -> PFut,
    PFut: Future<Output = Result<(), String>>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut delays = config.clone().into_backoff().build();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(RetryOutcome::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let result = match precondition().await {
            Ok(()) => op().await,
            Err(reason) => Err(SyncError::transient(
                operation,
                format!("precondition not met: {reason}"),
            )),
        };

        let err = match result {
            Ok(value) => {
                emit(
                    on_progress,
                    SyncProgress::Attempt(SyncAttempt {
                        operation: operation.to_string(),
                        attempt,
                        outcome: AttemptOutcome::Success,
                        backoff: None,
                        detail: None,
                    }),
                );
                return Ok(RetryOutcome::Success {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) if !err.is_transient() => {
                emit(
                    on_progress,
                    SyncProgress::Attempt(SyncAttempt {
                        operation: operation.to_string(),
                        attempt,
                        outcome: AttemptOutcome::FatalFailure,
                        backoff: None,
                        detail: Some(err.to_string()),
                    }),
                );
                return Err(err);
            }
            Err(err) => err,
        };

        let backoff = if attempt < config.max_attempts {
            delays.next()
        } else {
            None
        };
        let detail = err.to_string();

        emit(
            on_progress,
            SyncProgress::Attempt(SyncAttempt {
                operation: operation.to_string(),
                attempt,
                outcome: AttemptOutcome::TransientFailure,
                backoff,
                detail: Some(detail.clone()),
            }),
        );

        let Some(delay) = backoff else {
            warn!(operation, attempts = attempt, error = %detail, "retries exhausted");
            return Ok(RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: detail,
            });
        };

        debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %detail,
            "transient failure, backing off"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                return Ok(RetryOutcome::Cancelled { attempts: attempt });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(400),
        )
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<SyncAttempt>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            if let SyncProgress::Attempt(attempt) = event {
                sink.lock().unwrap().push(attempt);
            }
        });
        (callback, seen)
    }

    fn always_ready() -> impl FnMut() -> std::future::Ready<Result<(), String>> {
        || std::future::ready(Ok(()))
    }

    #[test]
    fn validate_rejects_zero_attempts_and_inverted_delays() {
        assert!(config(0).validate().is_err());
        let inverted = RetryConfig::new(3, Duration::from_secs(5), Duration::from_secs(1));
        assert!(inverted.validate().is_err());
        assert!(config(3).validate().is_ok());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let delays: Vec<_> = config(6).into_backoff().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(400),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_failures() {
        let calls = AtomicU32::new(0);
        let (callback, seen) = recorder();
        let cancel = CancellationToken::new();

        let outcome = run_with_retry(
            "fetch",
            &config(5),
            &cancel,
            always_ready(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(SyncError::transient("fetch", "blip"))
                    } else {
                        Ok(n)
                    }
                }
            },
            Some(&callback),
        )
        .await
        .unwrap();

        match outcome {
            RetryOutcome::Success { value, attempts } => {
                assert_eq!(value, 3);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected success, got {other:?}"),
        }

        let seen = seen.lock().unwrap();
        let delays: Vec<_> = seen.iter().filter_map(|a| a.backoff).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
        assert_eq!(seen.last().map(|a| a.outcome), Some(AttemptOutcome::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let outcome: RetryOutcome<()> = run_with_retry(
            "fetch",
            &config(3),
            &cancel,
            always_ready(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::transient("fetch", "remote timeout")) }
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("remote timeout"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<RetryOutcome<()>, _> = run_with_retry(
            "reset",
            &config(5),
            &cancel,
            always_ready(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::irrecoverable(Some("main"), "reset", "bad object")) }
            },
            None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmet_precondition_skips_the_operation() {
        let checks = AtomicU32::new(0);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let outcome = run_with_retry(
            "fetch",
            &config(5),
            &cancel,
            || {
                let n = checks.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("network unreachable".to_string())
                    } else {
                        Ok(())
                    }
                }
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(()) }
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let slow = RetryConfig::new(5, Duration::from_secs(30), Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            run_with_retry(
                "fetch",
                &slow,
                &cancel,
                || std::future::ready(Ok(())),
                || async { Err::<(), _>(SyncError::transient("fetch", "blip")) },
                None,
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1 }));
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_with_retry(
            "fetch",
            &config(3),
            &cancel,
            always_ready(),
            || async { Ok::<_, SyncError>(()) },
            None,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 0 }));
    }
}
