//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → passed by reference to every constructor
//! ```
//!
//! # Design Decisions
//! - No process-wide state; several clients may coexist in one process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffKind, ClientConfig, ConfirmationConfig, LogFormat, NodeConfig, ObservabilityConfig,
    SubscriptionConfig, TxConfig,
};
