use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reservd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reservd_query_duration_seconds";

/// Counter: availability answers. Labels: kind (dates, general), outcome.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "reservd_availability_checks_total";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations created. Labels: space_type.
pub const RESERVATIONS_CREATED_TOTAL: &str = "reservd_reservations_created_total";

/// Counter: automatic transitions applied. Labels: rule.
pub const LIFECYCLE_TRANSITIONS_TOTAL: &str = "reservd_lifecycle_transitions_total";

/// Counter: automatic transitions that failed to write.
pub const LIFECYCLE_ERRORS_TOTAL: &str = "reservd_lifecycle_errors_total";

/// Counter: unpaid cash reservations cancelled by the reaper.
pub const REAPER_CANCELLED_TOTAL: &str = "reservd_reaper_cancelled_total";

/// Counter: outbound email attempts. Labels: provider, status.
pub const MAIL_DELIVERIES_TOTAL: &str = "reservd_mail_deliveries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSpaceAvailability { .. } => "select_space_availability",
        Command::SelectSpaces => "select_spaces",
        Command::SelectClientStats { .. } => "select_client_stats",
        Command::ApplyReservationRules => "apply_reservation_rules",
        Command::ReapCashReservations => "reap_cash_reservations",
    }
}
