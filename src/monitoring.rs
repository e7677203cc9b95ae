use crate::error::TrackerError;
use anyhow::Result;
use metrics::{Counter, Gauge, counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static FRAMES_RECEIVED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("exec_tracker_frames_received_total"));
pub static EVENTS_APPLIED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("exec_tracker_events_applied_total"));
pub static MALFORMED_FRAMES_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("exec_tracker_malformed_frames_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("exec_tracker_reconnects_total"));
pub static CONNECTED_GAUGE: LazyLock<Gauge> = LazyLock::new(|| gauge!("exec_tracker_connected"));
pub static TRACKED_EXECUTIONS_GAUGE: LazyLock<Gauge> =
    LazyLock::new(|| gauge!("exec_tracker_tracked_executions"));

pub fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "exec-tracker")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(()) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            // Initialize metrics with default values
            FRAMES_RECEIVED_COUNTER.absolute(0);
            EVENTS_APPLIED_COUNTER.absolute(0);
            MALFORMED_FRAMES_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            CONNECTED_GAUGE.set(0.0);
            TRACKED_EXECUTIONS_GAUGE.set(0.0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(TrackerError::MetricsError(e.to_string()).into())
        }
    }
}
