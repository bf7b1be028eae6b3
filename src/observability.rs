use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests handled by the line protocol. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomkeep_request_duration_seconds";

/// Counter: booking and visit submissions. Labels: kind, status.
pub const SUBMISSIONS_TOTAL: &str = "roomkeep_submissions_total";

/// Counter: occurrences rejected because the room was taken.
pub const CONFLICTS_TOTAL: &str = "roomkeep_conflicts_total";

/// Histogram: occurrences generated per submission.
pub const OCCURRENCES_GENERATED: &str = "roomkeep_occurrences_generated";

/// Counter: submissions whose partial writes had to be deleted again.
pub const ROLLBACKS_TOTAL: &str = "roomkeep_rollbacks_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomkeep_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::ListRooms => "list_rooms",
        Request::CreateRoom { .. } => "create_room",
        Request::RenameRoom { .. } => "rename_room",
        Request::DeleteRoom { .. } => "delete_room",
        Request::CreateContact { .. } => "create_contact",
        Request::UpdateContact { .. } => "update_contact",
        Request::ListContacts { .. } => "list_contacts",
        Request::DeactivateContact { .. } => "deactivate_contact",
        Request::SubmitBooking(_) => "submit_booking",
        Request::SubmitContractorVisit(_) => "submit_contractor_visit",
        Request::SubmitGuestVisit(_) => "submit_guest_visit",
        Request::DeleteReservation { .. } => "delete_reservation",
        Request::Calendar { .. } => "calendar",
        Request::Series { .. } => "series",
        Request::AssignWeekend(_) => "assign_weekend",
        Request::UnassignWeekend { .. } => "unassign_weekend",
        Request::Weekends { .. } => "weekends",
    }
}
