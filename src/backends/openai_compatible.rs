//! Cloud chat-completions API (OpenAI, Groq, Together and friends)

use super::{BackendInvoker, InvokeContext, Invocation, classify_transport_error, error_from_response, probe_url};
use crate::catalog::CandidateBackend;
use crate::error::InvokeError;
use crate::router::{RequestKind, estimate_tokens};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ImageGeneration {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

pub struct OpenAiCompatibleInvoker {
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleInvoker {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> InvokeError {
        InvokeError::InvalidResponse {
            provider: self.provider_id.clone(),
            reason: reason.into(),
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, InvokeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .authorized(self.client.post(&url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&self.provider_id, timeout, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(&self.provider_id, response).await);
        }

        response.json().await.map_err(|e| self.invalid(e.to_string()))
    }

    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Invocation, InvokeError> {
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
        });
        let completion: ChatCompletion = self.post_json("/chat/completions", body, timeout).await?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.invalid("completion has no message content"))?;

        let tokens_used = completion
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(prompt) + estimate_tokens(&text));

        Ok(Invocation {
            text,
            tokens_used,
            placeholder: false,
        })
    }

    async fn image(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Invocation, InvokeError> {
        let body = json!({ "model": model, "prompt": prompt, "n": 1 });
        let generation: ImageGeneration =
            self.post_json("/images/generations", body, timeout).await?;

        let url = generation
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| self.invalid("image generation returned no url"))?;

        Ok(Invocation {
            text: url,
            tokens_used: estimate_tokens(prompt),
            placeholder: false,
        })
    }
}

#[async_trait]
impl BackendInvoker for OpenAiCompatibleInvoker {
    async fn invoke(
        &self,
        candidate: &CandidateBackend,
        prompt: &str,
        max_tokens: u32,
        ctx: &InvokeContext,
    ) -> Result<Invocation, InvokeError> {
        tracing::debug!(
            request_id = %ctx.request_id,
            provider = %self.provider_id,
            model = %candidate.model_id(),
            kind = ?ctx.kind,
            "Sending chat-completions request"
        );

        match ctx.kind {
            RequestKind::Text => {
                self.chat(candidate.model_id(), prompt, max_tokens, ctx.timeout)
                    .await
            }
            RequestKind::ImageGeneration => {
                self.image(candidate.model_id(), prompt, ctx.timeout).await
            }
            RequestKind::VideoGeneration => Err(InvokeError::Unsupported {
                provider: self.provider_id.clone(),
                reason: "video generation is not available on chat-completions APIs"
                    .to_string(),
            }),
        }
    }

    async fn probe(&self, timeout: Duration) -> Result<(), InvokeError> {
        let url = format!("{}/models", self.base_url);
        probe_url(
            &self.provider_id,
            self.authorized(self.client.head(&url)),
            timeout,
        )
        .await
    }
}
