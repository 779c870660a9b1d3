//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::ledger::BroadcastMode;

/// Root configuration for a ledger client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Node endpoints and chain identity.
    pub node: NodeConfig,

    /// Defaults applied to every transaction intent.
    pub tx: TxConfig,

    /// Confirmation polling policy.
    pub confirmation: ConfirmationConfig,

    /// Event subscription settings.
    pub subscription: SubscriptionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Node endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// WebSocket endpoint for event subscriptions.
    pub ws_url: String,

    /// REST gateway used for account queries.
    pub rest_url: String,

    /// Chain ID signed into every transaction.
    pub chain_id: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:26657".to_string(),
            failover_urls: Vec::new(),
            ws_url: "ws://localhost:26657/websocket".to_string(),
            rest_url: "http://localhost:1317".to_string(),
            chain_id: "spartan".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Transaction defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TxConfig {
    /// Gas limit used when an intent leaves it unset.
    pub gas_limit: u64,

    /// Fee used when an intent leaves it unset (e.g., "200000ugas"). Amounts
    /// are whole base units; "200000.0ugas" is accepted, "0.5ugas" is not.
    pub fee: String,

    /// Broadcast mode used by allowance transactions.
    pub broadcast_mode: BroadcastMode,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            gas_limit: 400_000,
            fee: "200000ugas".to_string(),
            broadcast_mode: BroadcastMode::Sync,
        }
    }
}

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Confirmation polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Maximum number of `queryTx` attempts.
    pub max_attempts: u32,

    /// Fixed delay or exponential backoff.
    pub backoff: BackoffKind,

    /// Fixed delay, or exponential base delay, in milliseconds.
    pub delay_ms: u64,

    /// Cap for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Consecutive not-found answers after which the transaction is presumed dropped.
    pub max_not_found: Option<u32>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Fixed,
            delay_ms: 2000,
            max_delay_ms: 10_000,
            max_not_found: None,
        }
    }
}

/// Event subscription configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Events a subscription holds for its consumer. Anything beyond this
    /// queues behind it without holding up other subscriptions.
    pub channel_capacity: usize,

    /// Reconnect attempts before every subscription is reported lost.
    pub reconnect_attempts: u32,

    /// Base delay for reconnect backoff in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay for reconnect backoff in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            reconnect_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 10_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Pretty for terminals, JSON for log shipping.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.node.request_timeout_secs, 10);
        assert_eq!(config.tx.fee, "200000ugas");
        assert_eq!(config.confirmation.max_attempts, 3);
        assert_eq!(config.confirmation.backoff, BackoffKind::Fixed);
        assert!(config.confirmation.max_not_found.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [node]
            chain_id = "testnet"

            [confirmation]
            backoff = "exponential"
            max_not_found = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.node.chain_id, "testnet");
        assert_eq!(config.node.rpc_url, "http://localhost:26657");
        assert_eq!(config.confirmation.backoff, BackoffKind::Exponential);
        assert_eq!(config.confirmation.max_not_found, Some(4));
        assert_eq!(config.tx.broadcast_mode, BroadcastMode::Sync);
    }
}
