//! Transaction lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionIntent
//!     → orchestrator.rs (defaults, checks, sequence, sign, broadcast)
//!     → TxHandle
//!     → tracker.rs (poll queryTx until terminal or budget spent)
//!     → TxResult
//!
//! allowance.rs builds grant/revoke intents and routes them through the
//! orchestrator like any other transaction.
//! ```

pub mod allowance;
pub mod orchestrator;
pub mod tracker;

pub use allowance::{Allowance, AllowanceFailure, AllowanceManager};
pub use orchestrator::TxOrchestrator;
pub use tracker::{ConfirmationPolicy, ConfirmationTracker};
