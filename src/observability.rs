use std::net::SocketAddr;

// ── Saga outcomes ───────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (`booked` or an error kind).
pub const RESERVATIONS_TOTAL: &str = "courtside_reservations_total";

/// Histogram: end-to-end reservation saga latency in seconds.
pub const RESERVATION_DURATION_SECONDS: &str = "courtside_reservation_duration_seconds";

/// Counter: cancellation attempts. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "courtside_cancellations_total";

/// Counter: compensating releases run after a failed persist. Labels: outcome.
pub const COMPENSATIONS_TOTAL: &str = "courtside_compensations_total";

/// Counter: releases that gave up. Labels: reason. Alert on any increase.
pub const RELEASE_FAILURES_TOTAL: &str = "courtside_release_failures_total";

/// Gauge: releases waiting in the dead-letter table.
pub const DEAD_LETTERS: &str = "courtside_dead_letters";

// ── Store ───────────────────────────────────────────────────────

/// Counter: store calls that hit the deadline. Labels: op.
pub const STORE_TIMEOUTS_TOTAL: &str = "courtside_store_timeouts_total";

/// Counter: write-ahead log compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "courtside_wal_compactions_total";

// ── Connections ─────────────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtside_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtside_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtside_connections_rejected_total";

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "courtside_requests_total";

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
