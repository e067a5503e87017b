//! Metrics collection and exposition.
//!
//! # Metrics
//! - `imlink_state_transitions_total` (counter): by `from`, `to`
//! - `imlink_connected` (gauge): 1 while the handler is `Ok`
//! - `imlink_packets_decoded_total` (counter)
//! - `imlink_decode_failures_total` (counter)
//! - `imlink_packets_sent_total` (counter)
//! - `imlink_login_attempts_total` (counter): by `outcome`
//! - `imlink_reconnect_attempts_total` (counter)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::handler::StateKind;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_state_transition(from: StateKind, to: StateKind) {
    metrics::counter!(
        "imlink_state_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    metrics::gauge!("imlink_connected").set(if to == StateKind::Ok { 1.0 } else { 0.0 });
}

pub fn record_packet_decoded() {
    metrics::counter!("imlink_packets_decoded_total").increment(1);
}

pub fn record_decode_failure() {
    metrics::counter!("imlink_decode_failures_total").increment(1);
}

pub fn record_packet_sent() {
    metrics::counter!("imlink_packets_sent_total").increment(1);
}

pub fn record_login_attempt(outcome: &'static str) {
    metrics::counter!("imlink_login_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_reconnect_attempt() {
    metrics::counter!("imlink_reconnect_attempts_total").increment(1);
}
