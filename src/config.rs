//! Configuration management for tierroute
//!
//! Parses TOML configuration files and provides typed access to settings.
//! The backend catalog lives here as one `[[backends]]` table; every other
//! component is built from the validated `Config`.

use crate::catalog::CandidateBackend;
use crate::error::{AppError, AppResult};
use crate::router::TaskType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Upper bound for any per-attempt timeout, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    pub providers: Vec<ProviderConfig>,
    pub backends: Vec<CandidateBackend>,
    /// Task type → model ids to try first within a tier, in order
    #[serde(default)]
    pub task_preferences: BTreeMap<TaskType, Vec<String>>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Dispatch executor settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout applied to each individual attempt
    pub attempt_timeout_seconds: u64,
    /// Extra attempts against the same candidate after a transient failure
    pub retry_budget: u32,
    /// Base backoff, doubled on every retry
    pub retry_backoff_ms: u64,
    /// Output token cap passed to backends
    pub max_output_tokens: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_seconds: 30,
            retry_budget: 2,
            retry_backoff_ms: 1_000,
            max_output_tokens: 1_000,
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    /// Prompt characters that feed the fingerprint
    pub fingerprint_prefix_chars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_entries: 1_000,
            fingerprint_prefix_chars: crate::router::MAX_PROMPT_CHARS,
        }
    }
}

/// Per-client rate limit settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
        }
    }
}

/// Monthly cost budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Limit applied to accounts without an explicit entry
    pub default_monthly_limit_usd: f64,
    /// Fraction of the limit at which a warning is logged
    pub alert_threshold: f64,
    pub accounts: Vec<AccountBudget>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_monthly_limit_usd: 50.0,
            alert_threshold: 0.8,
            accounts: Vec::new(),
        }
    }
}

impl BudgetConfig {
    /// Limit and alert threshold for an account, falling back to the defaults
    pub fn limits_for(&self, account_id: &str) -> (f64, f64) {
        match self.accounts.iter().find(|a| a.id == account_id) {
            Some(account) => (
                account.monthly_limit_usd,
                account.alert_threshold.unwrap_or(self.alert_threshold),
            ),
            None => (self.default_monthly_limit_usd, self.alert_threshold),
        }
    }
}

/// Budget override for one account
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountBudget {
    pub id: String,
    pub monthly_limit_usd: f64,
    #[serde(default)]
    pub alert_threshold: Option<f64>,
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Self-hosted GPU inference server (`/generate`, `/generate-image`)
    InferenceServer,
    /// Cloud chat-completions API with bearer authentication
    OpenaiCompatible,
    /// Keyless local endpoint driven through open-agent-sdk
    AgentSdk,
}

/// One provider a catalog backend can point at
///
/// Fields are private; instances only come from validated configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    id: String,
    kind: ProviderKind,
    base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key_env: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            api_key_env,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Provider health probe settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub probe_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
    /// Consecutive failures before a provider is flagged unavailable
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_seconds: 30,
            probe_timeout_seconds: 5,
            failure_threshold: 3,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a provider by id
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and `from_str()`; call it
    /// explicitly when building `Config` via `toml::from_str` in tests.
    pub fn validate(&self) -> AppResult<()> {
        self.validate_dispatch()?;
        self.validate_cache_and_limits()?;
        self.validate_budget()?;
        self.validate_providers()?;
        self.validate_backends()?;
        self.validate_task_preferences()?;
        Ok(())
    }

    fn validate_dispatch(&self) -> AppResult<()> {
        let timeout = self.dispatch.attempt_timeout_seconds;
        if timeout == 0 || timeout > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "dispatch.attempt_timeout_seconds must be in 1..={}, got {}",
                MAX_TIMEOUT_SECONDS, timeout
            )));
        }
        if self.dispatch.max_output_tokens == 0 {
            return Err(AppError::Config(
                "dispatch.max_output_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_cache_and_limits(&self) -> AppResult<()> {
        if self.cache.enabled {
            if self.cache.ttl_seconds == 0 {
                return Err(AppError::Config(
                    "cache.ttl_seconds must be greater than 0 when the cache is enabled"
                        .to_string(),
                ));
            }
            if self.cache.max_entries == 0 {
                return Err(AppError::Config(
                    "cache.max_entries must be greater than 0 when the cache is enabled"
                        .to_string(),
                ));
            }
            if self.cache.fingerprint_prefix_chars == 0 {
                return Err(AppError::Config(
                    "cache.fingerprint_prefix_chars must be greater than 0".to_string(),
                ));
            }
        }

        if self.rate_limit.window_seconds == 0 || self.rate_limit.max_requests == 0 {
            return Err(AppError::Config(format!(
                "rate_limit.window_seconds and rate_limit.max_requests must be greater than 0, \
                got window_seconds={} max_requests={}",
                self.rate_limit.window_seconds, self.rate_limit.max_requests
            )));
        }

        if self.health.enabled
            && (self.health.probe_interval_seconds == 0
                || self.health.probe_timeout_seconds == 0
                || self.health.failure_threshold == 0)
        {
            return Err(AppError::Config(
                "health.probe_interval_seconds, health.probe_timeout_seconds and \
                health.failure_threshold must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn validate_budget(&self) -> AppResult<()> {
        let check_limit = |what: &str, limit: f64| -> AppResult<()> {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(AppError::Config(format!(
                    "{} must be a positive finite number, got {}",
                    what, limit
                )));
            }
            Ok(())
        };
        let check_threshold = |what: &str, threshold: f64| -> AppResult<()> {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(AppError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    what, threshold
                )));
            }
            Ok(())
        };

        check_limit(
            "budget.default_monthly_limit_usd",
            self.budget.default_monthly_limit_usd,
        )?;
        check_threshold("budget.alert_threshold", self.budget.alert_threshold)?;

        let mut seen = HashSet::new();
        for account in &self.budget.accounts {
            if !seen.insert(account.id.as_str()) {
                return Err(AppError::Config(format!(
                    "budget account '{}' is declared more than once",
                    account.id
                )));
            }
            check_limit(
                &format!("budget account '{}' monthly_limit_usd", account.id),
                account.monthly_limit_usd,
            )?;
            if let Some(threshold) = account.alert_threshold {
                check_threshold(
                    &format!("budget account '{}' alert_threshold", account.id),
                    threshold,
                )?;
            }
        }
        Ok(())
    }

    fn validate_providers(&self) -> AppResult<()> {
        if self.providers.is_empty() {
            return Err(AppError::Config(
                "no [[providers]] configured. Example fix - add to config.toml:\n\
                [[providers]]\n\
                id = \"local-gpu\"\n\
                kind = \"inference_server\"\n\
                base_url = \"http://localhost:5000\""
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(AppError::Config(format!(
                    "provider '{}' is declared more than once",
                    provider.id
                )));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "provider '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    provider.id, provider.base_url
                )));
            }
            if provider
                .api_key_env
                .as_deref()
                .is_some_and(|name| name.trim().is_empty())
            {
                return Err(AppError::Config(format!(
                    "provider '{}' has an empty api_key_env",
                    provider.id
                )));
            }
        }
        Ok(())
    }

    fn validate_backends(&self) -> AppResult<()> {
        if self.backends.is_empty() {
            return Err(AppError::Config(
                "no [[backends]] configured - the catalog is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let label = format!("{}/{}", backend.provider_id(), backend.model_id());

            let Some(provider) = self.provider(backend.provider_id()) else {
                return Err(AppError::Config(format!(
                    "backend '{}' references unknown provider '{}'",
                    label,
                    backend.provider_id()
                )));
            };
            if !seen.insert((backend.provider_id(), backend.model_id())) {
                return Err(AppError::Config(format!(
                    "backend '{}' is declared more than once",
                    label
                )));
            }
            if backend.capabilities().is_empty() {
                return Err(AppError::Config(format!(
                    "backend '{}' declares no capabilities",
                    label
                )));
            }
            let quality = backend.quality_score();
            if !quality.is_finite() || !(0.0..=10.0).contains(&quality) {
                return Err(AppError::Config(format!(
                    "backend '{}' has quality_score {} outside 0-10",
                    label, quality
                )));
            }
            for (field, rate) in [
                ("input_cost_per_k_token", backend.input_cost_per_k_token()),
                ("output_cost_per_k_token", backend.output_cost_per_k_token()),
            ] {
                if !rate.is_finite() || rate < 0.0 {
                    return Err(AppError::Config(format!(
                        "backend '{}' has invalid {} {}",
                        label, field, rate
                    )));
                }
            }
            if backend.self_hosted() && !backend.is_free() {
                return Err(AppError::Config(format!(
                    "backend '{}' is self_hosted but declares non-zero token rates",
                    label
                )));
            }
            if backend.max_context_tokens() == 0 {
                return Err(AppError::Config(format!(
                    "backend '{}' has max_context_tokens=0",
                    label
                )));
            }
            if provider.kind() == ProviderKind::AgentSdk
                && backend
                    .capabilities()
                    .iter()
                    .any(|c| matches!(c, TaskType::Image | TaskType::Video))
            {
                return Err(AppError::Config(format!(
                    "backend '{}' declares image/video capability but provider '{}' \
                    (agent_sdk) only serves text",
                    label,
                    provider.id()
                )));
            }
        }
        Ok(())
    }

    fn validate_task_preferences(&self) -> AppResult<()> {
        for (task, models) in &self.task_preferences {
            for model in models {
                if !self.backends.iter().any(|b| b.model_id() == model) {
                    return Err(AppError::Config(format!(
                        "task_preferences.{} lists model '{}' which is not in the catalog",
                        task, model
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[dispatch]
attempt_timeout_seconds = 20
retry_budget = 2
retry_backoff_ms = 1000

[budget]
default_monthly_limit_usd = 10.0
alert_threshold = 0.8

[[budget.accounts]]
id = "enterprise"
monthly_limit_usd = 500.0

[[providers]]
id = "h100"
kind = "inference_server"
base_url = "http://10.0.0.5:5000"

[[providers]]
id = "groq"
kind = "openai_compatible"
base_url = "https://api.groq.com/openai/v1"
api_key_env = "GROQ_API_KEY"

[[providers]]
id = "openai"
kind = "openai_compatible"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"

[[backends]]
provider = "h100"
model = "mythomax-l2-13b"
capabilities = ["chat", "roleplay", "nsfw", "creative"]
tier = 0
quality_score = 7.5
max_context_tokens = 4096
self_hosted = true

[[backends]]
provider = "h100"
model = "deepseek-coder-33b"
capabilities = ["code"]
tier = 0
quality_score = 8.6
max_context_tokens = 16384
self_hosted = true

[[backends]]
provider = "h100"
model = "stable-diffusion-2.1"
capabilities = ["image"]
tier = 0
quality_score = 8.0
max_context_tokens = 1024
self_hosted = true

[[backends]]
provider = "groq"
model = "llama-3.1-70b"
capabilities = ["general", "code", "reasoning"]
tier = 1
quality_score = 8.7
max_context_tokens = 131072

[[backends]]
provider = "groq"
model = "mixtral-8x7b"
capabilities = ["general", "chat"]
tier = 1
quality_score = 7.8
max_context_tokens = 32768

[[backends]]
provider = "openai"
model = "gpt-4o"
capabilities = ["general", "code", "reasoning", "analysis", "financial"]
tier = 2
quality_score = 9.5
input_cost_per_k_token = 0.005
output_cost_per_k_token = 0.015
max_context_tokens = 128000

[[backends]]
provider = "openai"
model = "gpt-4o-mini"
capabilities = ["general", "chat"]
tier = 2
quality_score = 8.0
input_cost_per_k_token = 0.00015
output_cost_per_k_token = 0.0006
max_context_tokens = 128000

[task_preferences]
code = ["deepseek-coder-33b", "gpt-4o"]
roleplay = ["mythomax-l2-13b"]

[observability]
log_level = "info"
"#;
