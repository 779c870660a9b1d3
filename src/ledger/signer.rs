//! Signing seam.
//!
//! # Security
//! - Credentials are handed straight to the signer and never logged
//! - `Debug` output of a credential redacts the passphrase

use std::fmt;
use thiserror::Error;

use crate::ledger::types::{SignedTransaction, SigningContext, TransactionIntent};

/// Signer failure: bad credential, unknown key, or an intent it cannot encode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SignError(pub String);

/// Key reference plus unlock secret for a keystore-backed signer.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key_name: String,
    passphrase: String,
}

impl Credential {
    pub fn new(key_name: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key_name", &self.key_name)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Turns an intent into a signed payload. Pure from the client's point of view.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        intent: &TransactionIntent,
        credential: &Credential,
        context: &SigningContext,
    ) -> Result<SignedTransaction, SignError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_passphrase() {
        let credential = Credential::new("node0", "12345678");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("node0"));
        assert!(!rendered.contains("12345678"));
    }
}
