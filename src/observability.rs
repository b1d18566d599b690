use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled on the wire. Labels: op.
pub const REQUESTS_TOTAL: &str = "reservd_requests_total";

/// Counter: reservation attempts. Labels: outcome (`ok` or an error code).
pub const RESERVATIONS_TOTAL: &str = "reservd_reservations_total";

/// Histogram: end-to-end reservation latency in seconds.
pub const RESERVE_DURATION_SECONDS: &str = "reservd_reserve_duration_seconds";

/// Counter: reservations whose confirmation mail could not be delivered.
pub const MAIL_FAILURES_TOTAL: &str = "reservd_mail_failures_total";

/// Counter: committed reservations reverted by the rollback notify policy.
pub const RESERVATIONS_REVERTED_TOTAL: &str = "reservd_reservations_reverted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (changes per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
