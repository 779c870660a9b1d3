//! Error taxonomy for ledger interaction.

use thiserror::Error;

use crate::ledger::types::{ParseError, SubscriptionId, TxHash};

/// Failures raised by a [`Transport`](crate::ledger::Transport) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Node answered with something we could not decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Account is unknown to the ledger.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Streaming connection closed or could not be opened.
    #[error("Event connection closed: {0}")]
    ConnectionClosed(String),
}

/// Errors surfaced by the client to its callers.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No payload could be produced, either because the signer failed or
    /// because the intent was malformed. Never retried.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Node rejected the payload synchronously. The caller decides whether to resubmit.
    #[error("Broadcast rejected: {reason}")]
    Broadcast {
        reason: String,
        codespace: Option<String>,
        code: Option<u32>,
    },

    /// No terminal state observed within the retry budget. The transaction may still land.
    #[error("Transaction {hash} not confirmed after {attempts} attempts ({not_found} not found)")]
    ConfirmationTimeout {
        hash: TxHash,
        attempts: u32,
        not_found: u32,
    },

    /// Consecutive not-found answers exceeded the configured miss limit.
    #[error("Transaction {hash} presumed dropped after {misses} consecutive misses")]
    TxDropped { hash: TxHash, misses: u32 },

    /// The ledger included the transaction with a non-success code.
    #[error("Transaction {hash} failed at height {height} ({codespace}/{code}): {log}")]
    LedgerFailure {
        hash: TxHash,
        height: u64,
        codespace: String,
        code: u32,
        log: String,
    },

    /// The event connection could not be re-established; re-create the subscription.
    #[error("Subscription {id} lost: {reason}")]
    SubscriptionLost { id: SubscriptionId, reason: String },

    /// Allowance parameters rejected client-side.
    #[error("Invalid allowance: {0}")]
    InvalidAllowance(String),

    /// Confirmation polling stopped by an explicit cancel signal.
    #[error("Confirmation of {hash} cancelled")]
    Cancelled { hash: TxHash },

    /// The subscription registry was shut down.
    #[error("Subscription registry closed")]
    RegistryClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl LedgerError {
    /// `(codespace, code)` of a ledger-reported failure or rejection.
    pub fn ledger_code(&self) -> Option<(&str, u32)> {
        match self {
            LedgerError::LedgerFailure { codespace, code, .. } => Some((codespace.as_str(), *code)),
            LedgerError::Broadcast {
                codespace: Some(codespace),
                code: Some(code),
                ..
            } => Some((codespace.as_str(), *code)),
            _ => None,
        }
    }

    /// Errors worth retrying later with the same handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConfirmationTimeout { .. }
                | LedgerError::Cancelled { .. }
                | LedgerError::Transport(_)
        )
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = LedgerError::LedgerFailure {
            hash: TxHash::from_hex("ABCD").unwrap(),
            height: 42,
            codespace: "feegrant".to_string(),
            code: 5,
            log: "fee-grant not found".to_string(),
        };
        assert!(err.to_string().contains("feegrant/5"));
        assert_eq!(err.ledger_code(), Some(("feegrant", 5)));
    }

    #[test]
    fn test_recoverable_classification() {
        let hash = TxHash::from_hex("AB").unwrap();
        assert!(LedgerError::ConfirmationTimeout {
            hash: hash.clone(),
            attempts: 3,
            not_found: 3
        }
        .is_recoverable());
        assert!(!LedgerError::Signing("bad passphrase".into()).is_recoverable());
        assert!(!LedgerError::TxDropped { hash, misses: 5 }.is_recoverable());
    }
}
