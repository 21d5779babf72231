//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_connections_accepted_total` (counter)
//! - `relay_accept_errors_total` (counter)
//! - `relay_active_sessions` (gauge): connections currently owned by a worker
//! - `relay_lines_received_total` (counter)
//! - `relay_sessions_closed_total` (counter, label `reason`)
//! - `relay_feed_messages_total` / `relay_feed_errors_total` (counters)
//! - `relay_upstream_dials_total` (counter, label `outcome`)
//! - `relay_upstream_writes_total` / `relay_upstream_dropped_total` (counters)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener. Requires a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted() {
    ::metrics::counter!("relay_connections_accepted_total").increment(1);
}

pub fn record_accept_error() {
    ::metrics::counter!("relay_accept_errors_total").increment(1);
}

pub fn record_session_started() {
    ::metrics::gauge!("relay_active_sessions").increment(1.0);
}

pub fn record_session_closed(reason: &'static str) {
    ::metrics::gauge!("relay_active_sessions").decrement(1.0);
    ::metrics::counter!("relay_sessions_closed_total", "reason" => reason).increment(1);
}

pub fn record_line_received() {
    ::metrics::counter!("relay_lines_received_total").increment(1);
}

pub fn record_feed_message() {
    ::metrics::counter!("relay_feed_messages_total").increment(1);
}

pub fn record_feed_error() {
    ::metrics::counter!("relay_feed_errors_total").increment(1);
}

pub fn record_upstream_dial(outcome: &'static str) {
    ::metrics::counter!("relay_upstream_dials_total", "outcome" => outcome).increment(1);
}

pub fn record_upstream_write() {
    ::metrics::counter!("relay_upstream_writes_total").increment(1);
}

pub fn record_upstream_dropped() {
    ::metrics::counter!("relay_upstream_dropped_total").increment(1);
}
