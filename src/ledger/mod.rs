//! Ledger integration subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionIntent
//!     → signer.rs (external key material, opaque payload)
//!     → sequence.rs (per-account sequence, serialized submissions)
//!     → transport.rs (broadcast, queryTx, queryAccount, event stream)
//!     → rpc.rs (Tendermint JSON-RPC + WebSocket implementation)
//! ```
//!
//! # Security Constraints
//! - Credentials pass straight through to the signer and are never logged
//! - All RPC calls have configurable timeouts
//! - Result codes are only interpreted together with their codespace

pub mod error;
pub mod rpc;
pub mod sequence;
pub mod signer;
pub mod transport;
pub mod types;

pub use error::{LedgerError, LedgerResult, TransportError};
pub use rpc::TendermintRpc;
pub use sequence::{AccountSequence, SequenceTracker};
pub use signer::{Credential, SignError, Signer};
pub use transport::{BroadcastResponse, EventConnection, QueryEvent, Transport};
pub use types::{
    AccountId, AccountInfo, BlockEvent, BlockMeta, BroadcastMode, Coin, Coins, EventAttribute,
    EventQuery, MessagePayload, SignedTransaction, SigningContext, SubscriptionId,
    TransactionIntent, TxHandle, TxHash, TxOutcome, TxResult, CODE_OK,
};
