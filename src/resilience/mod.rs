//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Confirmation polling / stream reconnection:
//!     → retries.rs (attempt budget, run-until-success)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - One policy type for every retry site
//! - Jittered backoff prevents reconnect storms against one node

pub mod backoff;
pub mod retries;

pub use retries::{Backoff, RetryPolicy};
