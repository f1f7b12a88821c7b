//! Health endpoints.
//!
//! - `GET /health` - liveness (the process is running)
//! - `GET /ready` - readiness (startup finished, every lane consumer running
//!   and its last pop from the store succeeded)
//!
//! `/metrics` is merged onto the same listener in `main`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags for Kubernetes probes.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    /// Set once startup completes, cleared on shutdown.
    ready: AtomicBool,
    expected_lanes: usize,
    running_lanes: AtomicUsize,
    /// Running lanes whose last pop failed.
    stalled_lanes: AtomicUsize,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// live=true, ready=false, no lanes required.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lanes(0)
    }

    /// Readiness additionally requires `expected_lanes` running, unstalled
    /// lane consumers.
    #[must_use]
    pub fn with_lanes(expected_lanes: usize) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            expected_lanes,
            running_lanes: AtomicUsize::new(0),
            stalled_lanes: AtomicUsize::new(0),
        }
    }

    pub fn lane_started(&self) {
        self.running_lanes.fetch_add(1, Ordering::SeqCst);
    }

    /// `stalled` is the lane's last reported pop state.
    pub fn lane_stopped(&self, stalled: bool) {
        if stalled {
            self.stalled_lanes.fetch_sub(1, Ordering::SeqCst);
        }
        self.running_lanes.fetch_sub(1, Ordering::SeqCst);
    }

    /// A lane's pops started failing.
    pub fn lane_stalled(&self) {
        self.stalled_lanes.fetch_add(1, Ordering::SeqCst);
    }

    /// A stalled lane popped successfully again.
    pub fn lane_recovered(&self) {
        self.stalled_lanes.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

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
            && self.running_lanes.load(Ordering::SeqCst) >= self.expected_lanes
            && self.stalled_lanes.load(Ordering::SeqCst) == 0
    }
}

/// Router serving `/health` and `/ready`.
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

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
