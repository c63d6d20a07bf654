//! Liveness endpoint

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// "operational", or "degraded" once a background task has died or a
    /// metric failed to record
    pub background_status: &'static str,
    pub providers_available: usize,
    pub providers_total: usize,
}

/// Always 200 while the process serves requests
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics = state.metrics();
    let degraded = metrics.background_task_failures_count() > 0
        || metrics.metrics_recording_failures_count() > 0;

    let providers = state.router().health().get_all_statuses();
    let providers_available = providers.iter().filter(|p| p.available).count();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            background_status: if degraded { "degraded" } else { "operational" },
            providers_available,
            providers_total: providers.len(),
        }),
    )
}
