//! Metrics collection and exposition.
//!
//! # Metrics
//! - `client_request_duration_seconds` (histogram): time to response headers
//!   by service, host and status class
//! - `client_requests_total` (counter): responses by service, host, status class
//! - `client_request_errors_total` (counter): attempts without a response
//!   by service, host and failure kind
//! - `client_calls_total` (counter): logical calls by service and outcome
//! - `host_events_dropped_total` (counter): events discarded by full buffers
//!
//! # Design Decisions
//! - Calls go through the `metrics` facade; without an installed recorder
//!   they are no-ops
//! - Host label is `hostname:port`, service is its own label

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::FailureKind;
use crate::health::{HostKey, StatusClass};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    metrics::describe_histogram!(
        "client_request_duration_seconds",
        metrics::Unit::Seconds,
        "Time from sending an attempt to its response headers"
    );
    metrics::describe_counter!("client_requests_total", "Attempts that received a response");
    metrics::describe_counter!(
        "client_request_errors_total",
        "Attempts that received no response"
    );
    metrics::describe_counter!("client_calls_total", "Logical calls by outcome");
    metrics::describe_counter!(
        "host_events_dropped_total",
        "Host events discarded because a buffer was full"
    );
}

fn host_label(key: &HostKey) -> String {
    format!("{}:{}", key.hostname(), key.port())
}

/// An attempt that received a response.
pub fn record_attempt(key: &HostKey, status_code: u16, latency: Duration) {
    let service = key.service_name().to_string();
    let host = host_label(key);
    let class = StatusClass::of(status_code).as_str();
    metrics::counter!(
        "client_requests_total",
        "service" => service.clone(),
        "host" => host.clone(),
        "status" => class
    )
    .increment(1);
    metrics::histogram!(
        "client_request_duration_seconds",
        "service" => service,
        "host" => host,
        "status" => class
    )
    .record(latency.as_secs_f64());
}

/// An attempt that received no response.
pub fn record_io_failure(key: &HostKey, kind: FailureKind) {
    metrics::counter!(
        "client_request_errors_total",
        "service" => key.service_name().to_string(),
        "host" => host_label(key),
        "reason" => kind.as_str()
    )
    .increment(1);
}

/// Final outcome of a logical call: "success" or "exhausted".
pub fn record_call_outcome(service: &str, outcome: &'static str) {
    metrics::counter!(
        "client_calls_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_dropped_event() {
    metrics::counter!("host_events_dropped_total").increment(1);
}
