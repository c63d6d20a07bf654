//! Self-hosted GPU inference server
//!
//! Routes by request kind:
//!
//! | kind              | route                   | answer field |
//! |-------------------|-------------------------|--------------|
//! | text              | `POST /generate`        | `text`       |
//! | image generation  | `POST /generate-image`  | `image_url`  |
//! | video generation  | `POST /generate-video`  | `video_url`  |
//!
//! `/generate-video` is an extension: the stock server exposes only
//! `/generate`, `/generate-image`, `/models` and `/health`. A server without
//! it answers 404, which is a fatal failure, so dispatch moves on to the next
//! candidate without retrying.
//!
//! A response with `gpu_used: false` is mock output from a server without a
//! GPU; it is returned as a placeholder invocation.

use super::{BackendInvoker, InvokeContext, Invocation, classify_transport_error, error_from_response, probe_url};
use crate::catalog::CandidateBackend;
use crate::error::InvokeError;
use crate::router::{RequestKind, estimate_tokens};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    tokens_used: Option<u32>,
    #[serde(default = "default_gpu_used")]
    gpu_used: bool,
}

fn default_gpu_used() -> bool {
    true
}

/// Route and answer field for each request kind
fn route_for(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Text => "/generate",
        RequestKind::ImageGeneration => "/generate-image",
        RequestKind::VideoGeneration => "/generate-video",
    }
}

pub struct InferenceServerInvoker {
    provider_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl InferenceServerInvoker {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl BackendInvoker for InferenceServerInvoker {
    async fn invoke(
        &self,
        candidate: &CandidateBackend,
        prompt: &str,
        max_tokens: u32,
        ctx: &InvokeContext,
    ) -> Result<Invocation, InvokeError> {
        let url = format!("{}{}", self.base_url, route_for(ctx.kind));
        let body = GenerateRequest {
            prompt,
            model: candidate.model_id(),
            max_tokens: (!ctx.kind.is_generation()).then_some(max_tokens),
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            provider = %self.provider_id,
            model = %candidate.model_id(),
            url = %url,
            "Sending inference server request"
        );

        let response = self
            .client
            .post(&url)
            .timeout(ctx.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&self.provider_id, ctx.timeout, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(&self.provider_id, response).await);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InvokeError::InvalidResponse {
                provider: self.provider_id.clone(),
                reason: e.to_string(),
            })?;

        let (answer, field) = match ctx.kind {
            RequestKind::Text => (parsed.text, "text"),
            RequestKind::ImageGeneration => (parsed.image_url, "image_url"),
            RequestKind::VideoGeneration => (parsed.video_url, "video_url"),
        };
        let text = answer
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| InvokeError::InvalidResponse {
                provider: self.provider_id.clone(),
                reason: format!("response has no '{}' field", field),
            })?;

        if !parsed.gpu_used {
            tracing::warn!(
                request_id = %ctx.request_id,
                provider = %self.provider_id,
                model = %candidate.model_id(),
                "Inference server answered without a GPU; treating response as placeholder"
            );
        }

        Ok(Invocation {
            tokens_used: parsed
                .tokens_used
                .unwrap_or_else(|| estimate_tokens(prompt)),
            text,
            placeholder: !parsed.gpu_used,
        })
    }

    async fn probe(&self, timeout: Duration) -> Result<(), InvokeError> {
        let url = format!("{}/health", self.base_url);
        probe_url(&self.provider_id, self.client.get(&url), timeout).await
    }
}
