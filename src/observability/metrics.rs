//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fair_peer_selected_total` (counter): selections by upstream, backend
//! - `fair_busy_total` (counter): requests that found no backend
//! - `fair_backend_failures_total` (counter): failed attempts by backend
//! - `fair_fallback_total` (counter): upstreams built without shared counters
//! - `fair_zone_used_bytes` (gauge): shared zone occupancy
//! - `fair_zone_entries` (gauge): counter blocks in the zone directory
//! - `fair_generation` (gauge): generation currently served

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_selection(upstream: &str, backend: &str) {
    ::metrics::counter!(
        "fair_peer_selected_total",
        "upstream" => upstream.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
}

pub fn record_busy(upstream: &str) {
    ::metrics::counter!("fair_busy_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_backend_failure(upstream: &str, backend: &str) {
    ::metrics::counter!(
        "fair_backend_failures_total",
        "upstream" => upstream.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
}

pub fn record_fallback(upstream: &str) {
    ::metrics::counter!("fair_fallback_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_zone_usage(used_bytes: usize, entries: usize) {
    ::metrics::gauge!("fair_zone_used_bytes").set(used_bytes as f64);
    ::metrics::gauge!("fair_zone_entries").set(entries as f64);
}

pub fn record_generation(generation: u64) {
    ::metrics::gauge!("fair_generation").set(generation as f64);
}
