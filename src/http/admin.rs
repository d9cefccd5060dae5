//! Admin endpoints: liveness and limiter statistics.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::ratelimit::AdmissionFilter;

/// Snapshot of the limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    /// Whether admission control is applied
    pub enabled: bool,
    /// Number of clients currently holding a limiter entry
    pub tracked_clients: usize,
    /// Refill rate of each client's bucket
    pub requests_per_second: f64,
    /// Capacity of each client's bucket
    pub burst_size: u32,
}

/// Build the admin router.
pub fn router(filter: AdmissionFilter) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(filter)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(filter): State<AdmissionFilter>) -> Json<StatsResponse> {
    Json(StatsResponse {
        enabled: filter.is_enabled(),
        tracked_clients: filter.registry().len(),
        requests_per_second: filter.refill_rate(),
        burst_size: filter.capacity(),
    })
}
