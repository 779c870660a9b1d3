//! Event subscription subsystem.
//!
//! # Data Flow
//! ```text
//! subscribe(query)
//!     → registry.rs (table entry, command to driver, ack from node)
//!     → Subscription (bounded channel receiver)
//!
//! Driver task:
//!     event connection → dispatch by query → per-subscription channel
//!     connection drop  → reconnect with backoff → re-subscribe live queries
//!     budget exhausted → one SubscriptionLost per subscription, then close
//! ```

pub mod registry;
pub mod stream;

pub use registry::SubscriptionRegistry;
pub use stream::{Delivery, Subscription};
