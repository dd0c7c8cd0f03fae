use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "ringside_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "ringside_request_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (confirmed, pending, conflict, rejected).
pub const RESERVATIONS_TOTAL: &str = "ringside_reservations_total";

/// Counter: bookings moved to cancelled.
pub const CANCELLATIONS_TOTAL: &str = "ringside_cancellations_total";

// ── Collaborator health ─────────────────────────────────────────

/// Counter: availability queries answered without external busy data.
pub const EXTERNAL_QUERY_DEGRADED_TOTAL: &str = "ringside_external_query_degraded_total";

/// Counter: failed external calendar writes. Labels: op (create, delete).
pub const EXTERNAL_SYNC_FAILURES_TOTAL: &str = "ringside_external_sync_failures_total";

/// Counter: client notifications that could not be delivered.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "ringside_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered coaches.
pub const COACHES_ACTIVE: &str = "ringside_coaches_active";

/// Gauge: bookings waiting on external calendar work.
pub const SYNC_BACKLOG: &str = "ringside_sync_backlog";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "ringside_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "ringside_wal_flush_batch_size";

/// Install the tracing subscriber. JSON lines when `json` is set, otherwise
/// the human-readable format. `RUST_LOG` overrides the default filter.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ringside=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!(error = %e, "failed to install Prometheus metrics exporter"),
    }
}

/// Route-level RED metrics. Labelled by the matched route template so ids
/// in paths don't explode cardinality.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(started.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}
