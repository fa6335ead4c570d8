//! Short, bounded retry for individual remote calls.
//!
//! This only guards against flaky connections and 5xx responses on a single
//! call. Waiting for slow provisioning is the poller's job, not this one.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::config::duration_ms;
use crate::error::ClientError;

/// Retry configuration for a single remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    #[serde(with = "duration_ms", rename = "base_delay_ms")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Failure of a (possibly retried) remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The last error returned by the client and how many attempts were made.
    Client { error: ClientError, attempts: u32 },
    /// The pass was cancelled between attempts.
    Cancelled,
}

impl CallError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CallError::Client {
                error: ClientError::NotFound(_),
                ..
            }
        )
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// Permanent and not-found errors are returned after the first attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &Cancellation,
    what: &str,
    mut operation: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            if error.is_retryable() {
                warn!(call = what, attempts = attempt, error = %error, "Giving up after transient errors");
            }
            return Err(CallError::Client {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        debug!(
            call = what,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient error, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
        }
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
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_policy(3), &Cancellation::never(), "create", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::transient("connection reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> =
            with_retry(&fast_policy(5), &Cancellation::never(), "create", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::permanent(422, "invalid region")) }
            })
            .await;

        assert_eq!(
            result,
            Err(CallError::Client {
                error: ClientError::permanent(422, "invalid region"),
                attempts: 1,
            })
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_attempts() {
        let result: Result<(), _> =
            with_retry(&fast_policy(3), &Cancellation::never(), "delete", || async {
                Err(ClientError::transient("503"))
            })
            .await;

        assert!(matches!(result, Err(CallError::Client { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = with_retry(&fast_policy(3), &cancel, "create", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert_eq!(result, Err(CallError::Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
