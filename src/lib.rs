//! Ledger client: transaction lifecycle for a Cosmos/Tendermint-style chain.
//!
//! # Architecture Overview
//!
//! ```text
//!   TransactionIntent
//!         │
//!         ▼
//!   ┌──────────────┐   sign    ┌────────┐
//!   │ orchestrator │──────────▶│ Signer │
//!   └──────┬───────┘           └────────┘
//!          │ broadcast
//!          ▼
//!   ┌──────────────┐  queryTx  ┌──────────────┐
//!   │  Transport   │◀──────────│   tracker    │──▶ TxResult
//!   └──────┬───────┘           └──────────────┘
//!          │ event stream
//!          ▼
//!   ┌──────────────┐  channel per subscription
//!   │   registry   │──────────────────────────▶ BlockEvent
//!   └──────────────┘
//! ```
//!
//! Fee allowances are grant/revoke transactions built by
//! [`transaction::AllowanceManager`] and routed through the orchestrator.

// Core subsystems
pub mod client;
pub mod ledger;
pub mod subscription;
pub mod transaction;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::LedgerClient;
pub use config::ClientConfig;
pub use ledger::{LedgerError, LedgerResult};
