//! HTTP request handlers for tierroute

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::router::RouterService;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod chat;
pub mod health;
pub mod metrics;
pub mod status;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    router: Arc<RouterService>,
}

impl AppState {
    /// Build the router service and its provider clients from configuration
    pub fn new(config: Config) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("failed to register metrics: {}", e)))?;
        let router = RouterService::from_config(&config, metrics)?;
        Ok(Self::with_router(config, router))
    }

    /// Wrap an already-built router service
    pub fn with_router(config: Config, router: RouterService) -> Self {
        Self {
            config: Arc::new(config),
            router: Arc::new(router),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<RouterService> {
        &self.router
    }

    pub fn metrics(&self) -> &Metrics {
        self.router.metrics()
    }
}

/// Assemble the HTTP surface
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/ai/chat", post(chat::handler))
        .route("/health", get(health::handler))
        .route("/status", get(status::handler))
        .route("/metrics", get(metrics::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use std::str::FromStr;

    let config = Config::from_str(crate::config::TEST_CONFIG).expect("test config should parse");
    AppState::new(config).expect("state should build")
}
