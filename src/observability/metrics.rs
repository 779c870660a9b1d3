//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ledger_tx_submitted_total` (counter): accepted broadcasts by mode
//! - `ledger_tx_rejected_total` (counter): failed submissions by stage
//! - `ledger_confirm_attempts_total` (counter): `queryTx` calls by result
//! - `ledger_confirm_outcomes_total` (counter): final confirmation outcome
//! - `ledger_subscription_reconnects_total` (counter): reconnect rounds by result
//! - `ledger_subscriptions_lost_total` (counter)
//! - `ledger_active_subscriptions` (gauge)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`. Requires a running Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_submitted(mode: &'static str) {
    metrics::counter!("ledger_tx_submitted_total", "mode" => mode).increment(1);
}

pub fn record_rejected(stage: &'static str) {
    metrics::counter!("ledger_tx_rejected_total", "stage" => stage).increment(1);
}

pub fn record_confirm_attempt(result: &'static str) {
    metrics::counter!("ledger_confirm_attempts_total", "result" => result).increment(1);
}

pub fn record_confirm_outcome(outcome: &'static str) {
    metrics::counter!("ledger_confirm_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_reconnect(result: &'static str) {
    metrics::counter!("ledger_subscription_reconnects_total", "result" => result).increment(1);
}

pub fn record_subscriptions_lost(count: usize) {
    metrics::counter!("ledger_subscriptions_lost_total").increment(count as u64);
}

pub fn record_active_subscriptions(count: usize) {
    metrics::gauge!("ledger_active_subscriptions").set(count as f64);
}
