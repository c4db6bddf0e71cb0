//! Prometheus metrics for block device operations
//!
//! Recorded through the `metrics` facade; nothing is exported unless a
//! recorder is installed (see [`init_metrics`]).

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: lifecycle operations by type and status
    pub const OPERATIONS_TOTAL: &str = "blockdevice_operations_total";
    /// Histogram: duration of lifecycle operations in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "blockdevice_operation_duration_seconds";
    /// Counter: iSCSI logins/logouts by outcome
    pub const SESSION_CHANGES_TOTAL: &str = "iscsi_session_changes_total";
}

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a lifecycle operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record an iSCSI login or logout
pub fn record_session_change(kind: &str, success: bool) {
    counter!(names::SESSION_CHANGES_TOTAL, "kind" => kind.to_string(), "success" => success.to_string())
        .increment(1);
}

/// Times one lifecycle operation.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Record the outcome of `result` and pass it through.
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation(self.operation, status, self.start.elapsed().as_secs_f64());
        result
    }
}
