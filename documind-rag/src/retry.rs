//! Timeouts, retries and exponential backoff around external provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::error::ProviderError;

/// Why a provider call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The request was cancelled while waiting.
    Cancelled,
    /// The provider failed; `attempts` calls were made in total.
    Failed {
        /// The last failure observed.
        error: ProviderError,
        /// Number of calls made.
        attempts: u32,
    },
}

/// Run one provider call bounded by `timeout` and `token`.
///
/// An elapsed timeout is reported as [`ProviderError::Timeout`].
pub async fn call_once<T, Fut>(
    timeout: Duration,
    token: &CancellationToken,
    fut: Fut,
) -> Result<T, CallError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CallError::Cancelled),
        out = tokio::time::timeout(timeout, fut) => match out {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::Failed { error, attempts: 1 }),
            Err(_) => Err(CallError::Failed { error: ProviderError::Timeout(timeout), attempts: 1 }),
        },
    }
}

/// Run a provider call, retrying transient failures with exponential backoff.
///
/// `op` is invoked once per attempt. Non-transient failures are returned
/// immediately; transient ones are retried until `policy.max_attempts` calls
/// have been made. Backoff sleeps also observe `token`.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    token: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call_once(timeout, token, op()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt, "provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(CallError::Cancelled) => return Err(CallError::Cancelled),
            Err(CallError::Failed { error, .. }) => {
                if !error.is_transient() || attempt >= max_attempts {
                    return Err(CallError::Failed { error, attempts: attempt });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient provider failure, retrying"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, initial_backoff_ms: 100, max_backoff_ms: 1_000 }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = CancellationToken::new();

        let value = call_with_retry(&policy(3), Duration::from_secs(1), &token, "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 { Err(ProviderError::Unavailable("busy".into())) } else { Ok(n) }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let token = CancellationToken::new();
        let err = call_with_retry(&policy(3), Duration::from_millis(50), &token, "test", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ProviderError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(
            err,
            CallError::Failed {
                error: ProviderError::Timeout(Duration::from_millis(50)),
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = CancellationToken::new();

        let err = call_with_retry(&policy(5), Duration::from_secs(1), &token, "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::Rejected("bad key".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CallError::Failed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let slow = RetryPolicy { max_attempts: 5, initial_backoff_ms: 60_000, max_backoff_ms: 60_000 };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = call_with_retry(&slow, Duration::from_secs(1), &token, "test", || async {
            Err::<(), _>(ProviderError::Unavailable("down".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err, CallError::Cancelled);
    }
}
