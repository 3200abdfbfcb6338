//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::Fanout;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const CHUNKS_TOTAL: &str = "relay_chunks_total";
    pub const CHUNK_BYTES: &str = "relay_chunk_bytes_total";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const TOPICS_ACTIVE: &str = "relay_topics_active";
    pub const BROADCAST_SECONDS: &str = "relay_broadcast_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Connection roles used as the `role` label.
pub mod roles {
    pub const PUBLISHER: &str = "publisher";
    pub const SUBSCRIBER: &str = "subscriber";
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
    metrics::describe_counter!(names::CHUNKS_TOTAL, "Total number of chunks ingested");
    metrics::describe_counter!(names::CHUNK_BYTES, "Total bytes of chunks ingested");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Subscriber deliveries by outcome (queued, replaced, dropped)"
    );
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of topics with subscribers");
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time spent fanning out one chunk in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection(role: &'static str) {
    counter!(names::CONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "role" => role).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection(role: &'static str) {
    gauge!(names::CONNECTIONS_ACTIVE, "role" => role).decrement(1.0);
}

/// Record one ingested chunk and its fan-out.
pub fn record_broadcast(bytes: usize, fanout: &Fanout, elapsed: Duration) {
    counter!(names::CHUNKS_TOTAL).increment(1);
    counter!(names::CHUNK_BYTES).increment(bytes as u64);
    histogram!(names::BROADCAST_SECONDS).record(elapsed.as_secs_f64());

    for (outcome, count) in [
        ("queued", fanout.queued),
        ("replaced", fanout.replaced),
        ("dropped", fanout.dropped),
    ] {
        if count > 0 {
            counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(count as u64);
        }
    }
}

/// Update active topic count.
pub fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    role: &'static str,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(role: &'static str) -> Self {
        record_connection(role);
        Self { role }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.role);
    }
}
