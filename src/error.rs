//! Error types for tierroute
//!
//! `AppError` covers everything the router facade and HTTP layer can return.
//! `InvokeError` covers a single backend attempt and is never surfaced to the
//! caller directly: the dispatch executor absorbs it into the attempt history.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config file {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for client '{client}', retry after {retry_after_seconds}s")]
    RateLimited {
        client: String,
        retry_after_seconds: u64,
    },

    #[error(
        "Monthly budget exhausted for account '{account}' (spent ${spend_usd:.4} of ${limit_usd:.2})"
    )]
    BudgetExceeded {
        account: String,
        spend_usd: f64,
        limit_usd: f64,
    },

    #[error("No candidate fits the requested max cost of ${max_cost:.4}")]
    NoAffordableCandidate { max_cost: f64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::NoAffordableCandidate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        match self {
            Self::RateLimited {
                retry_after_seconds,
                ..
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_seconds.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// How the dispatch executor treats a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry the same candidate (with backoff) until the retry budget runs out
    Transient,
    /// Abandon the candidate immediately
    Fatal,
}

/// Failure of a single backend invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    #[error("{provider} timed out after {timeout_seconds}s")]
    Timeout {
        provider: String,
        timeout_seconds: u64,
    },

    #[error("{provider} connection failed: {reason}")]
    Connection { provider: String, reason: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected credentials: {reason}")]
    Auth { provider: String, reason: String },

    #[error("{provider} rejected the request as malformed: {reason}")]
    Malformed { provider: String, reason: String },

    #[error("{provider} does not support this request: {reason}")]
    Unsupported { provider: String, reason: String },

    #[error("{provider} returned an unreadable response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl InvokeError {
    /// Classify an HTTP error status returned by a provider
    pub fn from_status(provider: &str, status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth {
                provider: provider.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            },
            400 | 404 | 405 | 413 | 415 | 422 => Self::Malformed {
                provider: provider.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            },
            _ => Self::Upstream {
                provider: provider.to_string(),
                status,
                body,
            },
        }
    }

    /// Transient errors are retried; fatal errors abandon the candidate
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } | Self::InvalidResponse { .. } => {
                FailureClass::Transient
            }
            // 429 is the one 4xx worth retrying
            Self::Upstream { status, .. } if *status >= 500 || *status == 429 => {
                FailureClass::Transient
            }
            Self::Upstream { .. }
            | Self::Auth { .. }
            | Self::Malformed { .. }
            | Self::Unsupported { .. } => FailureClass::Fatal,
        }
    }

    /// Short label used in metrics and attempt records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connection { .. } => "connection",
            Self::Upstream { .. } => "upstream_status",
            Self::Auth { .. } => "auth",
            Self::Malformed { .. } => "malformed_request",
            Self::Unsupported { .. } => "unsupported",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}
