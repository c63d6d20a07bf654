//! Candidate backend catalog
//!
//! The catalog is loaded once from the `[[backends]]` table and never mutated.
//! Each row is one invocable (provider, model) pair with its capabilities,
//! tier, quality and pricing.

use crate::config::Config;
use crate::router::{RequestKind, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Share of a token count billed at the input rate; the rest is output
const INPUT_TOKEN_SHARE: f64 = 0.7;

/// One invocable (provider, model) pair
///
/// Fields are private to guarantee validation. Instances are created via
/// configuration deserialization (then checked by `Config::validate`) or
/// `CandidateBackend::new` in tests.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CandidateBackend {
    #[serde(rename = "provider")]
    provider_id: String,
    #[serde(rename = "model")]
    model_id: String,
    capabilities: BTreeSet<TaskType>,
    /// Lower tiers are tried first
    tier: u8,
    quality_score: f64,
    #[serde(default)]
    input_cost_per_k_token: f64,
    #[serde(default)]
    output_cost_per_k_token: f64,
    max_context_tokens: u32,
    #[serde(default)]
    self_hosted: bool,
}

impl CandidateBackend {
    /// Build a free backend; pricing and hosting are set with the builders below
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        capabilities: impl IntoIterator<Item = TaskType>,
        tier: u8,
        quality_score: f64,
        max_context_tokens: u32,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            capabilities: capabilities.into_iter().collect(),
            tier,
            quality_score,
            input_cost_per_k_token: 0.0,
            output_cost_per_k_token: 0.0,
            max_context_tokens,
            self_hosted: false,
        }
    }

    pub fn with_pricing(mut self, input_per_k: f64, output_per_k: f64) -> Self {
        self.input_cost_per_k_token = input_per_k;
        self.output_cost_per_k_token = output_per_k;
        self
    }

    pub fn with_self_hosted(mut self, self_hosted: bool) -> Self {
        self.self_hosted = self_hosted;
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn capabilities(&self) -> &BTreeSet<TaskType> {
        &self.capabilities
    }

    pub fn tier(&self) -> u8 {
        self.tier
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn input_cost_per_k_token(&self) -> f64 {
        self.input_cost_per_k_token
    }

    pub fn output_cost_per_k_token(&self) -> f64 {
        self.output_cost_per_k_token
    }

    pub fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    pub fn self_hosted(&self) -> bool {
        self.self_hosted
    }

    /// True when both token rates are zero
    pub fn is_free(&self) -> bool {
        self.input_cost_per_k_token == 0.0 && self.output_cost_per_k_token == 0.0
    }

    /// Whether this backend can serve the task
    ///
    /// Text tasks accept an exact capability match or `general`. Generation
    /// kinds need the exact capability.
    pub fn serves(&self, task_type: TaskType, kind: RequestKind) -> bool {
        self.capabilities.contains(&task_type)
            || (!kind.is_generation() && self.capabilities.contains(&TaskType::General))
    }

    /// Cost in USD of `tokens`, split 70/30 between input and output rates
    ///
    /// Used both for pre-dispatch estimates and for the recorded actual cost.
    pub fn cost_for_tokens(&self, tokens: u32) -> f64 {
        let tokens = f64::from(tokens);
        let input = tokens * INPUT_TOKEN_SHARE;
        let output = tokens - input;
        (input / 1000.0) * self.input_cost_per_k_token
            + (output / 1000.0) * self.output_cost_per_k_token
    }
}

impl fmt::Display for CandidateBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// Immutable backend table plus per-task preference lists
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    backends: Vec<CandidateBackend>,
    preferences: BTreeMap<TaskType, Vec<String>>,
}

impl Catalog {
    pub fn new(
        backends: Vec<CandidateBackend>,
        preferences: BTreeMap<TaskType, Vec<String>>,
    ) -> Self {
        Self {
            backends,
            preferences,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backends.clone(), config.task_preferences.clone())
    }

    pub fn backends(&self) -> &[CandidateBackend] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Position of `model_id` in the preference list for `task_type`
    pub fn preference_rank(&self, task_type: TaskType, model_id: &str) -> Option<usize> {
        self.preferences
            .get(&task_type)?
            .iter()
            .position(|m| m == model_id)
    }

    /// Whether any backend at all can serve the task, ignoring cost and quality
    pub fn has_capability(&self, task_type: TaskType, kind: RequestKind) -> bool {
        self.backends.iter().any(|b| b.serves(task_type, kind))
    }

    /// Whether a zero-cost backend can serve the task
    pub fn has_free_capability(&self, task_type: TaskType, kind: RequestKind) -> bool {
        self.backends
            .iter()
            .any(|b| b.is_free() && b.serves(task_type, kind))
    }

    /// Distinct provider ids referenced by the catalog, sorted
    pub fn provider_ids(&self) -> BTreeSet<&str> {
        self.backends.iter().map(|b| b.provider_id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_cost_splits_tokens_seventy_thirty() {
        let backend = CandidateBackend::new("openai", "gpt-4o", [TaskType::General], 2, 9.5, 128_000)
            .with_pricing(0.005, 0.015);
        // 700 input tokens at 0.005/k + 300 output tokens at 0.015/k
        let cost = backend.cost_for_tokens(1000);
        assert!((cost - (0.0035 + 0.0045)).abs() < 1e-12);
    }

    #[test]
    fn test_free_backend_costs_nothing() {
        let backend = CandidateBackend::new("h100", "mythomax", [TaskType::Chat], 0, 7.5, 4096)
            .with_self_hosted(true);
        assert!(backend.is_free());
        assert_eq!(backend.cost_for_tokens(1_000_000), 0.0);
    }

    #[test]
    fn test_general_serves_text_but_not_generation() {
        let backend = CandidateBackend::new("groq", "llama", [TaskType::General], 1, 8.0, 8192);
        assert!(backend.serves(TaskType::Financial, RequestKind::Text));
        assert!(!backend.serves(TaskType::Image, RequestKind::ImageGeneration));

        let sd = CandidateBackend::new("h100", "sd", [TaskType::Image], 0, 8.0, 1024);
        assert!(sd.serves(TaskType::Image, RequestKind::ImageGeneration));
        assert!(!sd.serves(TaskType::Chat, RequestKind::Text));
    }

    #[test]
    fn test_catalog_from_config_preferences() {
        let config = Config::from_str(crate::config::TEST_CONFIG).unwrap();
        let catalog = Catalog::from_config(&config);

        assert_eq!(catalog.len(), 7);
        assert_eq!(
            catalog.preference_rank(TaskType::Code, "deepseek-coder-33b"),
            Some(0)
        );
        assert_eq!(catalog.preference_rank(TaskType::Code, "gpt-4o"), Some(1));
        assert_eq!(catalog.preference_rank(TaskType::Chat, "gpt-4o"), None);
        assert!(!catalog.has_capability(TaskType::Video, RequestKind::VideoGeneration));
        assert!(catalog.has_free_capability(TaskType::Financial, RequestKind::Text));
        assert_eq!(
            catalog.provider_ids().into_iter().collect::<Vec<_>>(),
            vec!["groq", "h100", "openai"]
        );
    }

    #[test]
    fn test_display_is_provider_slash_model() {
        let backend = CandidateBackend::new("groq", "mixtral", [TaskType::Chat], 1, 7.8, 32_768);
        assert_eq!(backend.to_string(), "groq/mixtral");
    }
}
