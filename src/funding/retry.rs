//! Retry for the transient funding race
//!
//! Two funding transfers that pick the same treasury UTXO race each other; the
//! loser is rejected by the ledger with a zero-valued `ValueNotConservedUTxO`.
//! Re-querying the treasury and trying again usually succeeds, so funding
//! operations retry that one failure with a linear backoff. Everything else
//! fails immediately.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FundingConfig;
use crate::errors::{Result, ToolkitError};
use crate::metrics::metrics;

/// Retry policy for funding operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Wait after failed attempt `n` (1-based) is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FundingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_step: config.backoff_step(),
        }
    }

    /// Backoff after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn cancellable_sleep(
    duration: Duration,
    cancel: &CancellationToken,
    what: &str,
) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(ToolkitError::Cancelled(what.to_string())),
    }
}

/// Run `operation`, retrying while it fails with a retryable error
///
/// Returns the first success, the first non-retryable error, or
/// [`ToolkitError::RetriesExhausted`] wrapping the last error once the policy
/// runs out of attempts. Cancellation during a backoff returns
/// [`ToolkitError::Cancelled`] without another attempt.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(ToolkitError::Cancelled(operation_name.to_string()));
        }

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "All retry attempts exhausted"
            );
            return Err(ToolkitError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let backoff = policy.backoff(attempt);
        warn!(
            operation = operation_name,
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            "value not conserved, retrying"
        );
        metrics().funding_retries.inc();
        cancellable_sleep(backoff, cancel, operation_name).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn race() -> ToolkitError {
        ToolkitError::Process {
            command: "cardano-cli transaction submit".to_string(),
            output: "(ValueNotConservedUTxO (Value 0 (fromList [])) (Value 5 (fromList [])))"
                .to_string(),
            status: Some(1),
        }
        .context("failed to transfer funds")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds_with_linear_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let c = calls.clone();
        let result = retry_transient("fund", &RetryPolicy::default(), &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(race())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 2 + 4 + 6 seconds
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let c = calls.clone();
        let err = retry_transient::<_, _, ()>("fund", &RetryPolicy::default(), &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(race())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, ToolkitError::RetriesExhausted { attempts: 5, .. }));
        assert!(err.is_value_not_conserved());
        // 2 + 4 + 6 + 8 seconds, no wait after the last attempt
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = retry_transient::<_, _, ()>("fund", &RetryPolicy::default(), &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ToolkitError::validation("invalid quantity, abc"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let c = calls.clone();
        let err = retry_transient::<_, _, ()>("fund", &RetryPolicy::default(), &cancel, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(race())
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ToolkitError::Cancelled(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let waits: Vec<u64> = (1..5).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 6, 8]);
    }
}
