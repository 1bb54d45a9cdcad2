//! Metrics collection and export for Fanout.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Every series carries a `transport` label
//! (`udp`, `websocket` or `pubsub`).

use fanout_core::RouteReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "fanout_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "fanout_connections_active";
    pub const FRAMES_IN_TOTAL: &str = "fanout_frames_in_total";
    pub const FRAMES_OUT_TOTAL: &str = "fanout_frames_out_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "fanout_frames_dropped_total";
    pub const FRAMES_BYTES: &str = "fanout_frames_bytes";
    pub const MALFORMED_FRAMES_TOTAL: &str = "fanout_malformed_frames_total";
    pub const JOINS_TOTAL: &str = "fanout_joins_total";
    pub const ROOMS_ACTIVE: &str = "fanout_rooms_active";
    pub const EVICTIONS_TOTAL: &str = "fanout_evictions_total";
    pub const ROUTING_SECONDS: &str = "fanout_routing_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_IN_TOTAL, "Data frames received");
    metrics::describe_counter!(names::FRAMES_OUT_TOTAL, "Payloads delivered to members");
    metrics::describe_counter!(
        names::FRAMES_DROPPED_TOTAL,
        "Deliveries that failed (closed or full member queue)"
    );
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of data frames received");
    metrics::describe_counter!(
        names::MALFORMED_FRAMES_TOTAL,
        "Frames dropped because they could not be decoded"
    );
    metrics::describe_counter!(names::JOINS_TOTAL, "Join requests by outcome");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Idle UDP endpoints evicted");
    metrics::describe_histogram!(
        names::ROUTING_SECONDS,
        "Time to fan one frame out to its room, in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection(transport: &'static str) {
    counter!(names::CONNECTIONS_TOTAL, "transport" => transport).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "transport" => transport).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection(transport: &'static str) {
    gauge!(names::CONNECTIONS_ACTIVE, "transport" => transport).decrement(1.0);
}

/// Record one routed frame.
pub fn record_route(transport: &'static str, bytes: usize, report: &RouteReport, seconds: f64) {
    counter!(names::FRAMES_IN_TOTAL, "transport" => transport).increment(1);
    counter!(names::FRAMES_BYTES, "transport" => transport).increment(bytes as u64);
    counter!(names::FRAMES_OUT_TOTAL, "transport" => transport).increment(report.delivered as u64);
    if report.failed > 0 {
        counter!(names::FRAMES_DROPPED_TOTAL, "transport" => transport)
            .increment(report.failed as u64);
    }
    histogram!(names::ROUTING_SECONDS, "transport" => transport).record(seconds);
}

/// Record a frame dropped as undecodable.
pub fn record_malformed(transport: &'static str) {
    counter!(names::MALFORMED_FRAMES_TOTAL, "transport" => transport).increment(1);
}

/// Record the outcome of a join request.
pub fn record_join(transport: &'static str, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!(names::JOINS_TOTAL, "transport" => transport, "outcome" => outcome).increment(1);
}

/// Update the active room count.
pub fn set_active_rooms(transport: &'static str, count: usize) {
    gauge!(names::ROOMS_ACTIVE, "transport" => transport).set(count as f64);
}

/// Record idle evictions.
pub fn record_evictions(count: usize) {
    counter!(names::EVICTIONS_TOTAL, "transport" => "udp").increment(count as u64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    transport: &'static str,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(transport: &'static str) -> Self {
        record_connection(transport);
        Self { transport }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.transport);
    }
}
