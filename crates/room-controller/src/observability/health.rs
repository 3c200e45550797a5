//! Health endpoints for the Room Controller.
//!
//! Provides Kubernetes-compatible health endpoints:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we accept signaling connections?)
//!
//! The readiness body carries the current room and peer counts so an
//! operator can see load without scraping `/metrics`, which is served
//! separately via `metrics-exporter-prometheus`.

use crate::actors::ActorMetrics;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the Room Controller.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup initialization.
    live: AtomicBool,
    /// True while the signaling server accepts new connections.
    ready: AtomicBool,
    metrics: Arc<ActorMetrics>,
}

/// Body of the `/ready` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub rooms: usize,
    pub peers: usize,
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new(metrics: Arc<ActorMetrics>) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn readiness_report(&self) -> ReadinessReport {
        ReadinessReport {
            ready: self.is_ready(),
            rooms: self.metrics.room_count(),
            peers: self.metrics.peer_count(),
        }
    }
}

/// Create the health router with liveness and readiness endpoints.
///
/// - `GET /health` - 200 if the process is running
/// - `GET /ready` - 200 with a [`ReadinessReport`] when ready, 503 otherwise
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.readiness_report();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
