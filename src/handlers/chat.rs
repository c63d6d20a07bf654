//! Chat endpoint handler
//!
//! Handles POST /api/ai/chat. The body is a `RequestProfile` plus an optional
//! `account_id`; the caller identity for rate limiting comes from the
//! `x-client-id` header.

use crate::error::AppError;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::router::{RequestProfile, RouterResponse};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::Deserialize;

/// Header naming the caller for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";

const ANONYMOUS_CLIENT: &str = "anonymous";
const DEFAULT_ACCOUNT: &str = "default";

/// Chat request from client
///
/// Profile validation runs during deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(flatten)]
    profile: RequestProfile,
    #[serde(default = "default_account")]
    account_id: String,
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

impl ChatRequest {
    pub fn profile(&self) -> &RequestProfile {
        &self.profile
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

/// POST /api/ai/chat
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<RouterResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(request_id = %request_id, error = %rejection, "Rejected chat body");
        AppError::Validation(rejection.body_text())
    })?;

    let client = client_identity(&headers);
    let profile = request.profile();

    tracing::debug!(
        request_id = %request_id,
        task_type = %profile.task_type(),
        complexity = profile.complexity().as_str(),
        quality = profile.quality().as_str(),
        prompt_chars = profile.prompt().chars().count(),
        account_id = %request.account_id(),
        client = %client,
        "Received chat request"
    );

    let response = state
        .router()
        .route_with_id(profile, request.account_id(), &client, request_id)
        .await?;

    tracing::info!(
        request_id = %request_id,
        provider = %response.model_used.provider,
        model = %response.model_used.model,
        cost_usd = response.model_used.cost_usd,
        attempts = response.attempts.len(),
        cache_status = ?response.cache_status,
        "Chat request completed"
    );

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Complexity, TaskType};
    use axum::http::HeaderValue;

    #[test]
    fn test_chat_request_defaults() {
        let request: ChatRequest = serde_json::from_str(r#"{"prompt": "hello"}"#).unwrap();
        assert_eq!(request.account_id(), "default");
        assert_eq!(request.profile().task_type(), TaskType::General);
        assert_eq!(request.profile().complexity(), Complexity::Medium);
    }

    #[test]
    fn test_chat_request_full_body() {
        let request: ChatRequest = serde_json::from_str(
            r#"{
                "prompt": "write a parser",
                "task_type": "code",
                "complexity": "high",
                "max_cost": 0.05,
                "prefer_self_hosted": true,
                "account_id": "acme"
            }"#,
        )
        .unwrap();
        assert_eq!(request.account_id(), "acme");
        assert_eq!(request.profile().task_type(), TaskType::Code);
        assert_eq!(request.profile().max_cost(), Some(0.05));
        assert_eq!(request.profile().prefer_self_hosted(), Some(true));
    }

    #[test]
    fn test_chat_request_rejects_blank_prompt() {
        let result: Result<ChatRequest, _> = serde_json::from_str(r#"{"prompt": "   "}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_identity_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers), "anonymous");

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(client_identity(&headers), "anonymous");

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("team-a"));
        assert_eq!(client_identity(&headers), "team-a");
    }
}
