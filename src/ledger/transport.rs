//! Transport seam: everything the client needs from a ledger node.
//!
//! # Contract
//! - `broadcast_tx` returns once the node answered according to the mode.
//! - `query_tx` returns `Ok(None)` while the transaction is not indexed;
//!   that is distinct from a failed transaction, which is `Ok(Some(..))`
//!   with a non-success outcome.
//! - `connect_events` opens one streaming connection; the subscription
//!   registry is its only user.

use async_trait::async_trait;

use crate::ledger::error::TransportError;
use crate::ledger::types::{
    AccountId, AccountInfo, BlockEvent, BroadcastMode, EventQuery, TxHash, TxResult, CODE_OK,
};

/// Node answer to a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub hash: TxHash,
    /// Mempool admission code (CheckTx). Zero when accepted.
    pub code: u32,
    pub codespace: String,
    pub log: String,
    /// Inclusion result, present only for `block` mode.
    pub included: Option<TxResult>,
}

impl BroadcastResponse {
    pub fn is_accepted(&self) -> bool {
        self.code == CODE_OK
    }
}

/// An event tagged with the query it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub query: EventQuery,
    pub block: BlockEvent,
}

/// Request/response surface of a ledger node.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast_tx(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<BroadcastResponse, TransportError>;

    async fn query_tx(&self, hash: &TxHash) -> Result<Option<TxResult>, TransportError>;

    async fn query_account(&self, address: &AccountId) -> Result<AccountInfo, TransportError>;

    async fn connect_events(&self) -> Result<Box<dyn EventConnection>, TransportError>;
}

/// A persistent streaming connection multiplexing several queries.
#[async_trait]
pub trait EventConnection: Send {
    /// Returns once the node acknowledged the query.
    async fn subscribe(&mut self, query: &EventQuery) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, query: &EventQuery) -> Result<(), TransportError>;

    /// Next event. `Ok(None)` means the connection closed cleanly.
    async fn next_event(&mut self) -> Result<Option<QueryEvent>, TransportError>;
}
