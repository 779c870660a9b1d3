//! Per-account sequence (nonce) tracking.
//!
//! The first submission for an account loads its sequence from the ledger;
//! every accepted broadcast advances it locally. Each account has its own
//! async mutex, held by the submitter across sign and broadcast, so rapid
//! submissions from one account never reuse a sequence while different
//! accounts proceed in parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ledger::types::{AccountId, AccountInfo};

/// Signing numbers cached for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSequence {
    pub account_number: u64,
    pub next_sequence: u64,
}

impl From<&AccountInfo> for AccountSequence {
    fn from(info: &AccountInfo) -> Self {
        Self {
            account_number: info.account_number,
            next_sequence: info.sequence,
        }
    }
}

/// Process-local sequence table shared by all submissions.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    accounts: Arc<DashMap<AccountId, Arc<Mutex<Option<AccountSequence>>>>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership of an account's sequence until the guard drops.
    pub async fn lock(&self, account: &AccountId) -> SequenceGuard {
        let slot = self
            .accounts
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        SequenceGuard {
            account: account.clone(),
            state: slot.lock_owned().await,
        }
    }

    /// Cached next sequence, if known.
    pub async fn current(&self, account: &AccountId) -> Option<u64> {
        let slot = self.accounts.get(account).map(|r| r.value().clone())?;
        let state = slot.lock().await;
        state.map(|s| s.next_sequence)
    }
}

/// Exclusive access to one account's sequence.
#[derive(Debug)]
pub struct SequenceGuard {
    account: AccountId,
    state: OwnedMutexGuard<Option<AccountSequence>>,
}

impl SequenceGuard {
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn get(&self) -> Option<AccountSequence> {
        *self.state
    }

    /// Set the sequence (e.g., after querying from chain).
    pub fn set(&mut self, sequence: AccountSequence) {
        *self.state = Some(sequence);
    }

    /// Advance after an accepted broadcast.
    pub fn advance(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.next_sequence += 1;
        }
    }

    /// Forget the cached value so the next submission re-reads it from the ledger.
    pub fn invalidate(&mut self) {
        *self.state = None;
    }
}
