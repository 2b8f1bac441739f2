use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "classbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "classbook_query_duration_seconds";

/// Counter: writes rejected for overlapping an existing booking or period.
/// Labels: command.
pub const CONFLICTS_TOTAL: &str = "classbook_conflicts_total";

/// Counter: writes rejected by field validation. Labels: command.
pub const VALIDATION_FAILURES_TOTAL: &str = "classbook_validation_failures_total";

// ── Resource metrics ────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "classbook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "classbook_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "classbook_connections_rejected_total";

/// Gauge: institutions with a loaded engine.
pub const INSTITUTIONS_ACTIVE: &str = "classbook_institutions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "classbook_wal_flush_duration_seconds";

/// Histogram: records per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "classbook_wal_flush_batch_size";

pub const WAL_COMPACTIONS_TOTAL: &str = "classbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertClassroom { .. } => "insert_classroom",
        Command::UpdateClassroom { .. } => "update_classroom",
        Command::DeleteClassroom { .. } => "delete_classroom",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::BatchInsertReservations { .. } => "batch_insert_reservations",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::RequestReservations { .. } => "request_reservations",
        Command::InsertPeriod { .. } => "insert_period",
        Command::UpdatePeriod { .. } => "update_period",
        Command::DeletePeriod { .. } => "delete_period",
        Command::SelectClassrooms { .. } => "select_classrooms",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectPeriods { .. } => "select_periods",
        Command::SelectAuditLog { .. } => "select_audit_log",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
