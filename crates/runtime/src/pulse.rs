use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

pub use axum::Router;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use eyre::Result;
use metrics::Metrics;
use serde::Serialize;
use tracing::{info, warn};

use crate::shutdown::ShutdownSignal;

/// Time of the last completed watcher cycle, shared between the watcher and the pulse server.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    origin: Instant,
    last_beat_ms: Arc<AtomicU64>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self { origin: Instant::now(), last_beat_ms: Arc::new(AtomicU64::new(0)) }
    }
}

impl Heartbeat {
    /// Record a beat now.
    pub fn beat(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_beat_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last beat. Counted from creation before the first beat.
    pub fn age(&self) -> Duration {
        let last = Duration::from_millis(self.last_beat_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

#[derive(Debug, Serialize)]
struct PulseResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

#[derive(Debug, Clone)]
struct PulseState {
    heartbeat: Heartbeat,
    max_cycle_lifetime: Duration,
}

async fn pulse(State(state): State<PulseState>) -> impl IntoResponse {
    state.heartbeat.beat();
    health(State(state)).await
}

async fn health(State(state): State<PulseState>) -> impl IntoResponse {
    if state.heartbeat.age() > state.max_cycle_lifetime {
        warn!(age = ?state.heartbeat.age(), "Watcher cycle lifetime exceeded");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PulseResponse { status: "fail", reason: Some("timeout exceeded") }),
        );
    }
    (StatusCode::OK, Json(PulseResponse { status: "ok", reason: None }))
}

/// Router of the pulse server.
///
/// `GET /pulse/` records a heartbeat; any other GET reports whether the last
/// heartbeat is younger than `max_cycle_lifetime`.
pub fn pulse_router(heartbeat: Heartbeat, max_cycle_lifetime: Duration) -> Router {
    Router::new()
        .route("/pulse/", get(pulse))
        .fallback(get(health))
        .with_state(PulseState { heartbeat, max_cycle_lifetime })
}

async fn exposition(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.gather_text() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            error.to_string(),
        ),
    }
}

/// Router exposing `/metrics` in the Prometheus text format.
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new().route("/metrics", get(exposition)).with_state(metrics)
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve(name: &str, addr: SocketAddr, router: Router, shutdown: ShutdownSignal) -> Result<()> {
    info!(server = name, %addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service()).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
