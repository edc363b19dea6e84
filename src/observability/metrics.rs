//! Metrics collection and exposition.
//!
//! # Metrics
//! - `governor_rejections_total` (counter): admission refusals by reason, route
//! - `governor_mock_responses_total` (counter): mocked responses by route
//! - `governor_refresh_total` (counter): refresh cycles by outcome
//! - `governor_refresh_duration_seconds` (histogram): refresh cycle latency
//! - `governor_policy_rejected_rows_total` (counter): dropped rows by category
//! - `governor_alarms_total` (counter): alarms by kind

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_rejection(reason: &'static str, route: &str) {
    ::metrics::counter!(
        "governor_rejections_total",
        "reason" => reason,
        "route" => route.to_string()
    )
    .increment(1);
}

pub fn record_mock_response(route: &str) {
    ::metrics::counter!("governor_mock_responses_total", "route" => route.to_string()).increment(1);
}

pub fn record_refresh(outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!("governor_refresh_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("governor_refresh_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_rejected_row(category: &'static str) {
    ::metrics::counter!("governor_policy_rejected_rows_total", "category" => category).increment(1);
}

pub fn record_alarm(kind: &'static str) {
    ::metrics::counter!("governor_alarms_total", "kind" => kind).increment(1);
}
