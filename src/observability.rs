use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: operations committed with status Scheduled.
pub const OPERATIONS_SCHEDULED_TOTAL: &str = "otsched_operations_scheduled_total";

/// Counter: scheduling requests rejected for a room window conflict.
pub const ROOM_CONFLICTS_TOTAL: &str = "otsched_room_conflicts_total";

/// Counter: resource-assignment rows committed.
pub const ASSIGNMENTS_TOTAL: &str = "otsched_assignments_total";

/// Counter: per-resource assignment failures recorded in a plan.
pub const ASSIGNMENT_FAILURES_TOTAL: &str = "otsched_assignment_failures_total";

/// Histogram: schedule_operation latency in seconds.
pub const SCHEDULE_DURATION_SECONDS: &str = "otsched_schedule_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: real-time events published to the bus.
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "otsched_notifications_published_total";

/// Counter: equipment units returned to the Available pool by the reaper.
pub const EQUIPMENT_RELEASED_TOTAL: &str = "otsched_equipment_released_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "otsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "otsched_wal_flush_batch_size";

/// Install tracing and the Prometheus metrics exporter.
/// The exporter is a no-op if `port` is None.
pub fn init(port: Option<u16>) {
    let _ = tracing_subscriber::fmt::try_init();
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
