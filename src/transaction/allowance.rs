//! Fee allowances (fee grants).
//!
//! A granter lets a grantee spend up to a limit on transaction fees,
//! optionally until an expiration. Grant and revoke are ordinary
//! transactions signed by the granter; the ledger holds the authoritative
//! allowance and deducts spent fees from it. At most one allowance exists
//! per (granter, grantee); granting again replaces it.

use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ledger::{
    AccountId, Coins, Credential, LedgerError, LedgerResult, MessagePayload, TransactionIntent,
    TxHandle, TxResult,
};
use crate::transaction::orchestrator::TxOrchestrator;

pub const FEEGRANT_CODESPACE: &str = "feegrant";
/// Fee exceeds the remaining spend limit.
pub const FEE_LIMIT_EXCEEDED: u32 = 2;
pub const FEE_LIMIT_EXPIRED: u32 = 3;
/// No allowance exists for the (granter, grantee) pair.
pub const NO_ALLOWANCE: u32 = 5;

pub const MSG_GRANT_ALLOWANCE: &str = "/cosmos.feegrant.v1beta1.MsgGrantAllowance";
pub const MSG_REVOKE_ALLOWANCE: &str = "/cosmos.feegrant.v1beta1.MsgRevokeAllowance";
pub const BASIC_ALLOWANCE: &str = "/cosmos.feegrant.v1beta1.BasicAllowance";

/// Well-known ledger failures of the fee-grant module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceFailure {
    LimitExceeded,
    Expired,
    NotFound,
}

impl AllowanceFailure {
    pub fn code(self) -> u32 {
        match self {
            AllowanceFailure::LimitExceeded => FEE_LIMIT_EXCEEDED,
            AllowanceFailure::Expired => FEE_LIMIT_EXPIRED,
            AllowanceFailure::NotFound => NO_ALLOWANCE,
        }
    }

    pub fn from_code(codespace: &str, code: u32) -> Option<Self> {
        if codespace != FEEGRANT_CODESPACE {
            return None;
        }
        match code {
            FEE_LIMIT_EXCEEDED => Some(AllowanceFailure::LimitExceeded),
            FEE_LIMIT_EXPIRED => Some(AllowanceFailure::Expired),
            NO_ALLOWANCE => Some(AllowanceFailure::NotFound),
            _ => None,
        }
    }

    /// Classify a broadcast rejection or ledger failure.
    pub fn of_error(err: &LedgerError) -> Option<Self> {
        err.ledger_code()
            .and_then(|(codespace, code)| Self::from_code(codespace, code))
    }

    pub fn of_result(result: &TxResult) -> Option<Self> {
        Self::from_code(result.codespace(), result.code())
    }
}

/// Delegated fee authority from `granter` to `grantee`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub granter: AccountId,
    pub grantee: AccountId,
    pub spend_limit: Coins,
    pub expiration: Option<SystemTime>,
}

impl Allowance {
    pub fn new(
        granter: AccountId,
        grantee: AccountId,
        spend_limit: Coins,
        expiration: Option<SystemTime>,
    ) -> Self {
        Self {
            granter,
            grantee,
            spend_limit,
            expiration,
        }
    }

    /// Client-side checks run before a grant is signed.
    pub fn validate(&self, now: SystemTime) -> LedgerResult<()> {
        if self.granter == self.grantee {
            return Err(LedgerError::InvalidAllowance(format!(
                "granter and grantee are both {}",
                self.granter
            )));
        }
        if !self.spend_limit.is_all_positive() {
            return Err(LedgerError::InvalidAllowance(format!(
                "spend limit '{}' must be non-empty and positive",
                self.spend_limit
            )));
        }
        if self.is_expired(now) {
            return Err(LedgerError::InvalidAllowance(
                "expiration must be in the future".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Optimistic check whether `fee` could be paid from this allowance.
    /// The ledger has the final word.
    pub fn permits(&self, fee: &Coins, now: SystemTime) -> bool {
        !self.is_expired(now) && fee.is_all_lte(&self.spend_limit)
    }

    pub fn grant_message(&self) -> MessagePayload {
        let expiration = self
            .expiration
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        MessagePayload::new(
            MSG_GRANT_ALLOWANCE,
            json!({
                "granter": self.granter,
                "grantee": self.grantee,
                "allowance": {
                    "@type": BASIC_ALLOWANCE,
                    "spend_limit": self.spend_limit,
                    "expiration": expiration,
                },
            }),
        )
    }

    pub fn revoke_message(granter: &AccountId, grantee: &AccountId) -> MessagePayload {
        MessagePayload::new(
            MSG_REVOKE_ALLOWANCE,
            json!({
                "granter": granter,
                "grantee": grantee,
            }),
        )
    }
}

/// Grants and revokes allowances through the orchestrator.
#[derive(Debug, Clone)]
pub struct AllowanceManager {
    orchestrator: Arc<TxOrchestrator>,
}

impl AllowanceManager {
    pub fn new(orchestrator: Arc<TxOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Grant (or replace) an allowance. Signed and paid by the granter.
    pub async fn grant(
        &self,
        granter: &AccountId,
        grantee: &AccountId,
        spend_limit: Coins,
        expiration: Option<SystemTime>,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        let allowance = Allowance::new(granter.clone(), grantee.clone(), spend_limit, expiration);
        allowance.validate(SystemTime::now())?;

        let intent = TransactionIntent::builder(granter.clone())
            .mode(self.orchestrator.default_mode())
            .message(allowance.grant_message())
            .build();
        let handle = self.orchestrator.submit(intent, credential).await?;
        tracing::info!(
            hash = %handle,
            granter = %granter,
            grantee = %grantee,
            spend_limit = %allowance.spend_limit,
            "Fee allowance granted"
        );
        Ok(handle)
    }

    /// Revoke the allowance from `granter` to `grantee`.
    ///
    /// Revoking a missing allowance is reported by the ledger as
    /// [`AllowanceFailure::NotFound`].
    pub async fn revoke(
        &self,
        granter: &AccountId,
        grantee: &AccountId,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        if granter == grantee {
            return Err(LedgerError::InvalidAllowance(format!(
                "granter and grantee are both {}",
                granter
            )));
        }
        let intent = TransactionIntent::builder(granter.clone())
            .mode(self.orchestrator.default_mode())
            .message(Allowance::revoke_message(granter, grantee))
            .build();
        let handle = self.orchestrator.submit(intent, credential).await?;
        tracing::info!(hash = %handle, granter = %granter, grantee = %grantee, "Fee allowance revoked");
        Ok(handle)
    }
}
