//! Keyless local OpenAI-compatible endpoints (LM Studio, Ollama) via open-agent-sdk
//!
//! Text only. The SDK streams content blocks; text blocks are concatenated
//! and any stream error discards the partial answer. The SDK reports no
//! usage, so tokens are estimated from prompt and answer length.

use super::{BackendInvoker, InvokeContext, Invocation, probe_url};
use crate::catalog::CandidateBackend;
use crate::error::InvokeError;
use crate::router::{RequestKind, estimate_tokens};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// Sampling temperature for routed requests
const TEMPERATURE: f32 = 0.7;

pub struct AgentSdkInvoker {
    provider_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl AgentSdkInvoker {
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
impl BackendInvoker for AgentSdkInvoker {
    async fn invoke(
        &self,
        candidate: &CandidateBackend,
        prompt: &str,
        max_tokens: u32,
        ctx: &InvokeContext,
    ) -> Result<Invocation, InvokeError> {
        if ctx.kind != RequestKind::Text {
            return Err(InvokeError::Unsupported {
                provider: self.provider_id.clone(),
                reason: format!("{:?} is not available through the agent SDK", ctx.kind),
            });
        }

        let options = open_agent::AgentOptions::builder()
            .model(candidate.model_id())
            .base_url(&self.base_url)
            .max_tokens(max_tokens)
            .temperature(TEMPERATURE)
            .build()
            .map_err(|e| {
                tracing::error!(
                    request_id = %ctx.request_id,
                    provider = %self.provider_id,
                    model = %candidate.model_id(),
                    error = %e,
                    "Failed to build AgentOptions from provider configuration"
                );
                InvokeError::Malformed {
                    provider: self.provider_id.clone(),
                    reason: format!("invalid agent options: {}", e),
                }
            })?;

        let mut stream = open_agent::query(prompt, &options).await.map_err(|e| {
            InvokeError::Connection {
                provider: self.provider_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut text = String::new();
        let mut block_count = 0usize;
        while let Some(result) = stream.next().await {
            match result {
                Ok(block) => {
                    block_count += 1;
                    use open_agent::ContentBlock;
                    match block {
                        ContentBlock::Text(text_block) => text.push_str(&text_block.text),
                        other_block => {
                            tracing::warn!(
                                request_id = %ctx.request_id,
                                provider = %self.provider_id,
                                block_type = ?other_block,
                                block_number = block_count,
                                "Received non-text content block, skipping"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        provider = %self.provider_id,
                        error = %e,
                        block_count,
                        partial_response_length = text.len(),
                        "Stream error, discarding partial response"
                    );
                    return Err(InvokeError::InvalidResponse {
                        provider: self.provider_id.clone(),
                        reason: format!("stream interrupted after {} blocks: {}", block_count, e),
                    });
                }
            }
        }

        if text.trim().is_empty() {
            return Err(InvokeError::InvalidResponse {
                provider: self.provider_id.clone(),
                reason: "model returned an empty response".to_string(),
            });
        }

        Ok(Invocation {
            tokens_used: estimate_tokens(prompt).saturating_add(estimate_tokens(&text)),
            text,
            placeholder: false,
        })
    }

    async fn probe(&self, timeout: Duration) -> Result<(), InvokeError> {
        // base_url already includes /v1, so /models lands on the model list
        let url = format!("{}/models", self.base_url);
        probe_url(&self.provider_id, self.client.head(&url), timeout).await
    }
}
