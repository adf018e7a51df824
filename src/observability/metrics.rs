//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, interruptions, sync)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by api and status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_policy_interruptions_total` (counter): by interruption key
//! - `gateway_policy_failures_total` (counter): by policy id
//! - `gateway_condition_errors_total` (counter): failed condition expressions
//! - `gateway_not_found_total` (counter): requests matching no api
//! - `gateway_apis_deployed` (gauge): apis in the registry
//! - `gateway_sync_events_total` (counter): by registry type and result
//! - `gateway_sync_full_resyncs_total` (counter): by registry type
//! - `gateway_sync_source_available` (gauge): 1=reachable, 0=unreachable
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels stay low-cardinality: api id, status, key, type

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(error) => tracing::error!(address = %addr, error = %error, "Failed to install metrics exporter"),
    }
}

pub fn record_request(api_id: &str, status: u16, duration: Duration) {
    counter!("gateway_requests_total", "api" => api_id.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "api" => api_id.to_string()).record(duration.as_secs_f64());
}

pub fn record_not_found() {
    counter!("gateway_not_found_total").increment(1);
}

pub fn record_policy_interruption(key: &str) {
    counter!("gateway_policy_interruptions_total", "key" => key.to_string()).increment(1);
}

pub fn record_policy_failure(policy: &str) {
    counter!("gateway_policy_failures_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_condition_error() {
    counter!("gateway_condition_errors_total").increment(1);
}

pub fn record_apis_deployed(count: usize) {
    gauge!("gateway_apis_deployed").set(count as f64);
}

pub fn record_sync_event(registry_type: &str, result: &'static str) {
    counter!("gateway_sync_events_total", "type" => registry_type.to_string(), "result" => result).increment(1);
}

pub fn record_full_resync(registry_type: &str) {
    counter!("gateway_sync_full_resyncs_total", "type" => registry_type.to_string()).increment(1);
}

pub fn set_sync_source_available(available: bool) {
    gauge!("gateway_sync_source_available").set(if available { 1.0 } else { 0.0 });
}
