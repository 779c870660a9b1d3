//! Confirmation polling.
//!
//! A broadcast hash says nothing about inclusion. The tracker polls
//! `queryTx` until the ledger reports a terminal result or the retry
//! budget runs out. A failed transaction is still a terminal result and is
//! returned as `Ok`; use [`TxResult::ensure_success`] to turn it into an
//! error.

use std::sync::Arc;

use crate::config::ConfirmationConfig;
use crate::ledger::{LedgerError, LedgerResult, Transport, TxHandle, TxResult};
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfirmationPolicy {
    pub retry: RetryPolicy,
    /// Consecutive not-found answers after which the transaction is presumed dropped.
    pub max_not_found: Option<u32>,
}

impl ConfirmationPolicy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            max_not_found: None,
        }
    }

    pub fn with_max_not_found(mut self, misses: u32) -> Self {
        self.max_not_found = Some(misses.max(1));
        self
    }
}

impl From<&ConfirmationConfig> for ConfirmationPolicy {
    fn from(config: &ConfirmationConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            max_not_found: config.max_not_found,
        }
    }
}

/// Stateless poller over a shared transport. Cheap to clone.
#[derive(Clone)]
pub struct ConfirmationTracker {
    transport: Arc<dyn Transport>,
}

impl ConfirmationTracker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn confirm(
        &self,
        handle: &TxHandle,
        policy: &ConfirmationPolicy,
    ) -> LedgerResult<TxResult> {
        self.confirm_with_cancel(handle, policy, CancelToken::never())
            .await
    }

    /// Poll until terminal, budget exhausted, or `cancel` fires.
    ///
    /// Cancellation also abandons a query that is already in flight.
    pub async fn confirm_with_cancel(
        &self,
        handle: &TxHandle,
        policy: &ConfirmationPolicy,
        mut cancel: CancelToken,
    ) -> LedgerResult<TxResult> {
        let max_attempts = policy.retry.max_attempts();
        let mut not_found = 0u32;
        let mut misses = 0u32;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = policy.retry.delay_after(attempt - 1);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(handle)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let answer = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(handle)),
                answer = self.transport.query_tx(handle) => answer,
            };

            match answer {
                Ok(Some(result)) => {
                    metrics::record_confirm_attempt("found");
                    metrics::record_confirm_outcome(if result.is_success() {
                        "success"
                    } else {
                        "failure"
                    });
                    tracing::info!(
                        hash = %handle,
                        height = result.height,
                        code = result.code(),
                        codespace = result.codespace(),
                        attempt,
                        "Transaction confirmed"
                    );
                    return Ok(result);
                }
                Ok(None) => {
                    metrics::record_confirm_attempt("not_found");
                    not_found += 1;
                    misses += 1;
                    tracing::debug!(hash = %handle, attempt, misses, "Transaction pending");
                    if let Some(limit) = policy.max_not_found {
                        if misses >= limit {
                            metrics::record_confirm_outcome("dropped");
                            tracing::warn!(hash = %handle, misses, "Transaction presumed dropped");
                            return Err(LedgerError::TxDropped {
                                hash: handle.clone(),
                                misses,
                            });
                        }
                    }
                }
                // Transport trouble says nothing about the transaction; retry
                // without touching the consecutive-miss count.
                Err(e) => {
                    metrics::record_confirm_attempt("error");
                    tracing::warn!(hash = %handle, attempt, error = %e, "Transient error polling transaction");
                }
            }
        }

        metrics::record_confirm_outcome("timeout");
        tracing::warn!(hash = %handle, attempts = max_attempts, not_found, "Confirmation budget exhausted");
        Err(LedgerError::ConfirmationTimeout {
            hash: handle.clone(),
            attempts: max_attempts,
            not_found,
        })
    }
}

fn cancelled(handle: &TxHandle) -> LedgerError {
    metrics::record_confirm_outcome("cancelled");
    tracing::debug!(hash = %handle, "Confirmation cancelled");
    LedgerError::Cancelled {
        hash: handle.clone(),
    }
}
