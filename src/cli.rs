//! Command-line interface for tierroute

use clap::{Parser, Subcommand};

/// Tiered request router for self-hosted and cloud AI providers
#[derive(Parser)]
#[command(name = "tierroute")]
#[command(version)]
#[command(about = "Tiered request router for self-hosted and cloud AI providers")]
#[command(
    long_about = "tierroute picks the cheapest capable backend for each request, \
    self-hosted GPUs first, then free cloud tiers, then paid APIs, retrying and \
    falling back across providers while enforcing rate limits and monthly budgets."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load and validate a configuration file, then exit
    Check,
}

/// Template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# tierroute configuration
# =======================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
host = "0.0.0.0"
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# DISPATCH
# ─────────────────────────────────────────────────────────────────────────────
#
# Each candidate gets 1 + retry_budget attempts. Only transient failures
# (timeouts, connection errors, 429, 5xx) are retried; backoff doubles per
# retry and is capped at 30s.

[dispatch]
attempt_timeout_seconds = 30
retry_budget = 2
retry_backoff_ms = 1000
max_output_tokens = 1000

# ─────────────────────────────────────────────────────────────────────────────
# CACHE, RATE LIMIT, BUDGET
# ─────────────────────────────────────────────────────────────────────────────

[cache]
enabled = true
ttl_seconds = 300
max_entries = 1000

[rate_limit]
window_seconds = 60
max_requests = 100

[budget]
default_monthly_limit_usd = 50.0
alert_threshold = 0.8

# Per-account overrides:
# [[budget.accounts]]
# id = "enterprise"
# monthly_limit_usd = 500.0

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# kind:
#   - "inference_server": self-hosted GPU server (/generate, /generate-image)
#   - "openai_compatible": cloud chat-completions API, key read from api_key_env
#   - "agent_sdk": keyless local OpenAI-compatible endpoint (text only)

[[providers]]
id = "local-gpu"
kind = "inference_server"
base_url = "http://localhost:5000"

[[providers]]
id = "openai"
kind = "openai_compatible"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"

# ─────────────────────────────────────────────────────────────────────────────
# BACKEND CATALOG
# ─────────────────────────────────────────────────────────────────────────────
#
# tier: 0 = self-hosted, 1 = free cloud, 2 = paid cloud. Lower tiers are
# tried first. Costs are USD per 1000 tokens.

[[backends]]
provider = "local-gpu"
model = "your-chat-model"
capabilities = ["chat", "creative", "general"]
tier = 0
quality_score = 7.5
max_context_tokens = 4096
self_hosted = true

[[backends]]
provider = "openai"
model = "gpt-4o-mini"
capabilities = ["general", "chat", "code"]
tier = 2
quality_score = 8.0
input_cost_per_k_token = 0.00015
output_cost_per_k_token = 0.0006
max_context_tokens = 128000

# Models to try first within a tier, per task type:
[task_preferences]
code = ["gpt-4o-mini"]

# ─────────────────────────────────────────────────────────────────────────────
# HEALTH AND OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[health]
enabled = true
probe_interval_seconds = 30
probe_timeout_seconds = 5
failure_threshold = 3

[observability]
# RUST_LOG overrides this when set
log_level = "info"
"#
}
