use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "stayd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "stayd_query_duration_seconds";

/// Counter: booking decisions. Labels: decision (`accepted` or a rejection kind).
pub const BOOKING_DECISIONS_TOTAL: &str = "stayd_booking_decisions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "stayd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "stayd_connections_total";
/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "stayd_connections_rejected_total";

/// Gauge: number of open tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "stayd_tenants_active";

/// Counter: connections whose user name is not a valid user id.
pub const AUTH_FAILURES_TOTAL: &str = "stayd_auth_failures_total";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayd_wal_flush_duration_seconds";
/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayd_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertPlace { .. } => "insert_place",
        Command::UpdatePlace { .. } => "update_place",
        Command::InsertPhotos { .. } => "insert_photos",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectPlace { .. } => "select_place",
        Command::SelectPlaces { .. } => "select_places",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
    }
}
