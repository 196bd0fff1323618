//! Liveness and readiness
//!
//! [`HealthMonitor`] answers one question: is the operator still making
//! progress? It is live when a cycle is running and started recently, or
//! the last cycle finished recently, where "recently" is a multiple of the
//! configured interval. The HTTP surface in [`routes`] only reports it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tracing::{error, info};

/// Tracks cycle activity for health checks
#[derive(Debug)]
pub struct HealthMonitor {
    tolerance: Duration,
    /// Cycles currently running, by Cleanup key, with their start time
    active: DashMap<String, Instant>,
    /// (first cycle start, last cycle end)
    history: Mutex<(Option<Instant>, Option<Instant>)>,
    ready: AtomicBool,
}

impl HealthMonitor {
    /// Create a monitor that tolerates `multiplier` intervals without progress
    pub fn new(interval: Duration, multiplier: u32) -> Self {
        Self {
            tolerance: interval.saturating_mul(multiplier.max(1)),
            active: DashMap::new(),
            history: Mutex::new((None, None)),
            ready: AtomicBool::new(false),
        }
    }

    /// Record that a cycle started
    pub fn cycle_started(&self, key: &str) {
        self.cycle_started_at(key, Instant::now());
    }

    /// Record that a cycle ended, whatever its outcome
    pub fn cycle_finished(&self, key: &str) {
        self.cycle_finished_at(key, Instant::now());
    }

    fn cycle_started_at(&self, key: &str, at: Instant) {
        self.active.insert(key.to_string(), at);
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.0.get_or_insert(at);
    }

    fn cycle_finished_at(&self, key: &str, at: Instant) {
        self.active.remove(key);
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.1 = Some(at);
    }

    /// Mark the controller as started (CRD installed, watch running)
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether the controller has started
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether a cycle is making progress or one finished within tolerance
    pub fn is_progressing(&self) -> bool {
        self.is_progressing_at(Instant::now())
    }

    /// [`Self::is_progressing`] evaluated at a given instant
    pub fn is_progressing_at(&self, now: Instant) -> bool {
        let fresh = |t: Instant| now.saturating_duration_since(t) <= self.tolerance;

        // One stuck cycle fails liveness even while other Cleanups complete
        let mut any_active = false;
        for entry in self.active.iter() {
            if !fresh(*entry.value()) {
                return false;
            }
            any_active = true;
        }
        if any_active {
            return true;
        }

        let (first_start, last_end) = *self.history.lock().unwrap_or_else(PoisonError::into_inner);
        match (first_start, last_end) {
            (_, Some(end)) => fresh(end),
            (Some(start), None) => fresh(start),
            // Nothing has been scheduled yet, so nothing can be stuck
            (None, None) => true,
        }
    }
}

async fn healthz(State(monitor): State<Arc<HealthMonitor>>) -> (StatusCode, &'static str) {
    if monitor.is_progressing() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no cycle progress")
    }
}

async fn readyz(State(monitor): State<Arc<HealthMonitor>>) -> (StatusCode, &'static str) {
    if monitor.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

/// Build the health router
pub fn routes(monitor: Arc<HealthMonitor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(monitor)
}

/// Serve health endpoints until the process exits
pub async fn serve(addr: std::net::SocketAddr, monitor: Arc<HealthMonitor>) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "Health server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "Failed to bind health server");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, routes(monitor)).await {
        error!(error = %e, "Health server error");
    }
}
