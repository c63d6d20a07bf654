//! Operator status endpoint: cache, rate limiter and provider health

use axum::{Json, extract::State};

use crate::handlers::AppState;
use crate::router::RouterStatus;

pub async fn handler(State(state): State<AppState>) -> Json<RouterStatus> {
    Json(state.router().status())
}
