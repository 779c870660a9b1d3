//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, attempts > 0, capacities > 0)
//! - Check endpoint URLs and the default fee string
//!
//! Returns every validation error, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BackoffKind, ClientConfig};
use crate::ledger::Coins;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str, schemes: &[&str]) {
    match url::Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}' (expected {})", url.scheme(), schemes.join("/")),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url(&mut errors, "node.rpc_url", &config.node.rpc_url, &["http", "https", "tcp"]);
    for url in &config.node.failover_urls {
        check_url(&mut errors, "node.failover_urls", url, &["http", "https", "tcp"]);
    }
    check_url(&mut errors, "node.ws_url", &config.node.ws_url, &["ws", "wss"]);
    check_url(&mut errors, "node.rest_url", &config.node.rest_url, &["http", "https"]);

    if config.node.chain_id.trim().is_empty() {
        errors.push(ValidationError::new("node.chain_id", "must not be empty"));
    }
    if config.node.request_timeout_secs == 0 {
        errors.push(ValidationError::new("node.request_timeout_secs", "must be greater than 0"));
    }

    if config.tx.gas_limit == 0 {
        errors.push(ValidationError::new("tx.gas_limit", "must be greater than 0"));
    }
    match config.tx.fee.parse::<Coins>() {
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("tx.fee", e.to_string())),
    }

    let confirmation = &config.confirmation;
    if confirmation.max_attempts == 0 {
        errors.push(ValidationError::new("confirmation.max_attempts", "must be greater than 0"));
    }
    if confirmation.backoff == BackoffKind::Exponential && confirmation.max_delay_ms < confirmation.delay_ms {
        errors.push(ValidationError::new(
            "confirmation.max_delay_ms",
            "must not be lower than confirmation.delay_ms",
        ));
    }
    if confirmation.max_not_found == Some(0) {
        errors.push(ValidationError::new("confirmation.max_not_found", "must be greater than 0 when set"));
    }

    let subscription = &config.subscription;
    if subscription.channel_capacity == 0 {
        errors.push(ValidationError::new("subscription.channel_capacity", "must be greater than 0"));
    }
    if subscription.reconnect_attempts == 0 {
        errors.push(ValidationError::new("subscription.reconnect_attempts", "must be greater than 0"));
    }
    if subscription.reconnect_max_delay_ms < subscription.reconnect_base_delay_ms {
        errors.push(ValidationError::new(
            "subscription.reconnect_max_delay_ms",
            "must not be lower than subscription.reconnect_base_delay_ms",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
