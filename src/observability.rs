use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "tutorbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "tutorbook_http_request_duration_seconds";

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "tutorbook_bookings_created_total";

/// Counter: bookings cancelled by their owner.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "tutorbook_bookings_cancelled_total";

/// Counter: creates rejected for overlap. Labels: reason.
pub const BOOKING_CONFLICTS_TOTAL: &str = "tutorbook_booking_conflicts_total";

/// Counter: authentication failures.
pub const AUTH_FAILURES_TOTAL: &str = "tutorbook_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: retries after a scope lock stayed busy. Labels: op.
pub const SCOPE_LOCK_RETRIES_TOTAL: &str = "tutorbook_scope_lock_retries_total";

/// Counter: mutations that gave up on contention. Labels: op.
pub const TRANSIENT_FAILURES_TOTAL: &str = "tutorbook_transient_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "tutorbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
