//! Backend invokers
//!
//! A `BackendInvoker` turns one candidate plus a prompt into an `Invocation`
//! or an `InvokeError`. The dispatch executor owns timeouts and retries; an
//! invoker performs exactly one attempt.
//!
//! One invoker is registered per configured provider, chosen by the
//! provider's `kind`.

pub mod agent_sdk;
pub mod inference_server;
pub mod openai_compatible;

pub use agent_sdk::AgentSdkInvoker;
pub use inference_server::InferenceServerInvoker;
pub use openai_compatible::OpenAiCompatibleInvoker;

use crate::catalog::CandidateBackend;
use crate::config::{Config, ProviderKind};
use crate::error::{AppError, AppResult, InvokeError};
use crate::middleware::RequestId;
use crate::router::RequestKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt context handed to an invoker
#[derive(Debug, Clone, Copy)]
pub struct InvokeContext {
    pub request_id: RequestId,
    pub kind: RequestKind,
    /// Deadline the executor enforces; HTTP invokers mirror it on the client
    pub timeout: Duration,
}

/// Successful answer from one backend
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub tokens_used: u32,
    /// Mock output from a degraded backend; served but never cached
    pub placeholder: bool,
}

#[async_trait]
pub trait BackendInvoker: Send + Sync {
    /// Perform a single attempt against `candidate`
    async fn invoke(
        &self,
        candidate: &CandidateBackend,
        prompt: &str,
        max_tokens: u32,
        ctx: &InvokeContext,
    ) -> Result<Invocation, InvokeError>;

    /// Cheap reachability check used by the background health probes
    async fn probe(&self, timeout: Duration) -> Result<(), InvokeError>;
}

/// Maps provider ids to their invokers
#[derive(Clone, Default)]
pub struct BackendRegistry {
    invokers: HashMap<String, Arc<dyn BackendInvoker>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one invoker per configured provider
    ///
    /// HTTP invokers share a single `reqwest::Client`.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();
        for provider in &config.providers {
            let invoker: Arc<dyn BackendInvoker> = match provider.kind() {
                ProviderKind::InferenceServer => Arc::new(InferenceServerInvoker::new(
                    provider.id(),
                    provider.base_url(),
                    client.clone(),
                )),
                ProviderKind::OpenaiCompatible => {
                    if provider.api_key_env().is_some() && provider.api_key().is_none() {
                        tracing::warn!(
                            provider = %provider.id(),
                            api_key_env = ?provider.api_key_env(),
                            "API key environment variable is not set; requests will be unauthenticated"
                        );
                    }
                    Arc::new(OpenAiCompatibleInvoker::new(
                        provider.id(),
                        provider.base_url(),
                        provider.api_key(),
                        client.clone(),
                    ))
                }
                ProviderKind::AgentSdk => Arc::new(AgentSdkInvoker::new(
                    provider.id(),
                    provider.base_url(),
                    client.clone(),
                )),
            };
            registry.register(provider.id(), invoker);
        }

        tracing::info!(
            providers = registry.len(),
            "Backend invokers registered"
        );
        Ok(registry)
    }

    pub fn register(&mut self, provider_id: impl Into<String>, invoker: Arc<dyn BackendInvoker>) {
        self.invokers.insert(provider_id.into(), invoker);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn BackendInvoker>> {
        self.invokers.get(provider_id).cloned()
    }

    /// Provider ids with a registered invoker, sorted
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.invokers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}

/// Map a transport-level reqwest failure onto the invoke taxonomy
pub(crate) fn classify_transport_error(
    provider: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> InvokeError {
    if err.is_timeout() {
        InvokeError::Timeout {
            provider: provider.to_string(),
            timeout_seconds: timeout.as_secs(),
        }
    } else if err.is_decode() {
        InvokeError::InvalidResponse {
            provider: provider.to_string(),
            reason: err.to_string(),
        }
    } else {
        InvokeError::Connection {
            provider: provider.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Turn a non-success response into an `InvokeError`, keeping a short body excerpt
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> InvokeError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    InvokeError::from_status(provider, status, excerpt)
}

/// HEAD/GET probe shared by the HTTP invokers
pub(crate) async fn probe_url(
    provider: &str,
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<(), InvokeError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_transport_error(provider, timeout, e))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(provider, response).await)
    }
}
