//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ledger_submissions_total` (counter): submissions by network, outcome
//! - `ledger_confirmations_total` (counter): confirmation waits by network, outcome
//! - `ledger_events_delivered_total` (counter): handler deliveries by event
//! - `ledger_cursor_block` (gauge): last processed block per subscription
//! - `ledger_connection_health` (gauge): 1=healthy, 0=unhealthy, per network
//! - `ledger_subscriber_reconnects_total` (counter): reconnects per subscription

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_submission(network: &str, outcome: &'static str) {
    metrics::counter!(
        "ledger_submissions_total",
        "network" => network.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_confirmation(network: &str, outcome: &'static str) {
    metrics::counter!(
        "ledger_confirmations_total",
        "network" => network.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_event_delivered(event: &str) {
    metrics::counter!("ledger_events_delivered_total", "event" => event.to_string()).increment(1);
}

pub fn record_cursor(subscription: &str, block: u64) {
    metrics::gauge!("ledger_cursor_block", "subscription" => subscription.to_string())
        .set(block as f64);
}

pub fn record_connection_health(network: &str, healthy: bool) {
    metrics::gauge!("ledger_connection_health", "network" => network.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_reconnect(subscription: &str) {
    metrics::counter!(
        "ledger_subscriber_reconnects_total",
        "subscription" => subscription.to_string()
    )
    .increment(1);
}
