//! Shared fixtures for integration tests: a three-tier catalog and scripted
//! invokers that stand in for real providers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tierroute::backends::{BackendInvoker, BackendRegistry, Invocation, InvokeContext};
use tierroute::catalog::CandidateBackend;
use tierroute::config::Config;
use tierroute::error::InvokeError;
use tierroute::ledger::CostLedger;
use tierroute::metrics::Metrics;
use tierroute::router::RouterService;

/// local (tier 0, free) → free-cloud (tier 1, free) → paid (tier 2, priced)
pub const FIXTURE: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[dispatch]
attempt_timeout_seconds = 2
retry_budget = 2
retry_backoff_ms = 100

[budget]
default_monthly_limit_usd = 10.0

[health]
enabled = false

[[providers]]
id = "local"
kind = "inference_server"
base_url = "http://127.0.0.1:5000"

[[providers]]
id = "free-cloud"
kind = "openai_compatible"
base_url = "https://free.example.com/v1"

[[providers]]
id = "paid"
kind = "openai_compatible"
base_url = "https://paid.example.com/v1"

[[backends]]
provider = "local"
model = "local-chat"
capabilities = ["chat", "creative"]
tier = 0
quality_score = 7.5
max_context_tokens = 4096
self_hosted = true

[[backends]]
provider = "free-cloud"
model = "free-llama"
capabilities = ["chat", "code", "reasoning"]
tier = 1
quality_score = 8.7
max_context_tokens = 131072

[[backends]]
provider = "paid"
model = "paid-large"
capabilities = ["general", "code", "analysis"]
tier = 2
quality_score = 9.5
input_cost_per_k_token = 0.005
output_cost_per_k_token = 0.015
max_context_tokens = 128000
"#;

pub fn fixture_config() -> Config {
    Config::from_str(FIXTURE).expect("fixture should validate")
}

/// What a scripted invoker does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Reply(&'static str, u32),
    Placeholder,
    Transient,
    Fatal,
    Hang,
}

pub struct ScriptedInvoker {
    provider: String,
    script: Mutex<VecDeque<Step>>,
    otherwise: Step,
    calls: AtomicUsize,
    answered: Arc<Notify>,
}

impl ScriptedInvoker {
    /// Repeat `step` on every call
    pub fn always(provider: &str, step: Step) -> Arc<Self> {
        Self::scripted(provider, [], step)
    }

    /// Play `steps` in order, then repeat `otherwise`
    pub fn scripted(
        provider: &str,
        steps: impl IntoIterator<Item = Step>,
        otherwise: Step,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
            script: Mutex::new(steps.into_iter().collect()),
            otherwise,
            calls: AtomicUsize::new(0),
            answered: Arc::new(Notify::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Notified each time an invocation returns an answer
    pub fn answered(&self) -> Arc<Notify> {
        self.answered.clone()
    }
}

#[async_trait]
impl BackendInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        candidate: &CandidateBackend,
        _prompt: &str,
        _max_tokens: u32,
        _ctx: &InvokeContext,
    ) -> Result<Invocation, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone());

        match step {
            Step::Reply(text, tokens) => {
                self.answered.notify_one();
                Ok(Invocation {
                    text: format!("{} from {}", text, candidate.model_id()),
                    tokens_used: tokens,
                    placeholder: false,
                })
            }
            Step::Placeholder => Ok(Invocation {
                text: "[placeholder output]".to_string(),
                tokens_used: 0,
                placeholder: true,
            }),
            Step::Transient => Err(InvokeError::Upstream {
                provider: self.provider.clone(),
                status: 503,
                body: "service unavailable".to_string(),
            }),
            Step::Fatal => Err(InvokeError::Auth {
                provider: self.provider.clone(),
                reason: "HTTP 401: invalid api key".to_string(),
            }),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("the executor times the attempt out first")
            }
        }
    }

    async fn probe(&self, _timeout: Duration) -> Result<(), InvokeError> {
        Ok(())
    }
}

pub struct Harness {
    pub service: RouterService,
    pub ledger: Arc<CostLedger>,
    pub local: Arc<ScriptedInvoker>,
    pub free: Arc<ScriptedInvoker>,
    pub paid: Arc<ScriptedInvoker>,
}

pub fn harness(local: Step, free: Step, paid: Step) -> Harness {
    harness_with(
        fixture_config(),
        ScriptedInvoker::always("local", local),
        ScriptedInvoker::always("free-cloud", free),
        ScriptedInvoker::always("paid", paid),
    )
}

pub fn harness_with(
    config: Config,
    local: Arc<ScriptedInvoker>,
    free: Arc<ScriptedInvoker>,
    paid: Arc<ScriptedInvoker>,
) -> Harness {
    let mut backends = BackendRegistry::new();
    backends.register("local", local.clone());
    backends.register("free-cloud", free.clone());
    backends.register("paid", paid.clone());

    let ledger = Arc::new(CostLedger::new(config.budget.clone()));
    let metrics = Metrics::new().expect("metrics should register");
    let service = RouterService::new(&config, backends, ledger.clone(), metrics)
        .expect("service should build");

    Harness {
        service,
        ledger,
        local,
        free,
        paid,
    }
}
