//! Request routing for tierroute
//!
//! The request profile types live here; the pipeline that consumes them is
//! split into selection (ranking), dispatch (attempt loop) and the
//! `RouterService` facade that ties them to the cache, limiter and ledger.

pub mod dispatch;
pub mod selection;
pub mod service;

pub use dispatch::{AttemptOutcome, DispatchAttempt, DispatchExecutor, DispatchOutcome};
pub use selection::SelectionEngine;
pub use service::{CacheStatus, ModelUsed, RouterResponse, RouterService, RouterStatus};

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Maximum allowed prompt length in characters
pub const MAX_PROMPT_CHARS: usize = 50_000;

/// Task type declared by the caller
///
/// Doubles as the capability tag vocabulary of the catalog: a backend
/// declaring `code` can serve `TaskType::Code`, and `general` serves any
/// text task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Reasoning,
    Code,
    Chat,
    Creative,
    Image,
    Video,
    Voice,
    Financial,
    Nsfw,
    Roleplay,
    Analysis,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Code => "code",
            Self::Chat => "chat",
            Self::Creative => "creative",
            Self::Image => "image",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::Financial => "financial",
            Self::Nsfw => "nsfw",
            Self::Roleplay => "roleplay",
            Self::Analysis => "analysis",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Requested answer quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Basic,
    #[default]
    Standard,
    Premium,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

/// What kind of output a request asks for
///
/// Resolved once from the task type when the profile is built. Invokers pick
/// their route from this instead of inspecting model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Text,
    ImageGeneration,
    VideoGeneration,
}

impl RequestKind {
    pub fn for_task(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Image => Self::ImageGeneration,
            TaskType::Video => Self::VideoGeneration,
            _ => Self::Text,
        }
    }

    /// Generation kinds need a backend that declares the exact capability;
    /// a `general` text model cannot render an image.
    pub fn is_generation(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// One inbound request, validated at construction
#[derive(Debug, Clone, Serialize)]
pub struct RequestProfile {
    task_type: TaskType,
    complexity: Complexity,
    quality: Quality,
    prompt: String,
    max_cost: Option<f64>,
    prefer_self_hosted: Option<bool>,
    estimated_tokens: Option<u32>,
    #[serde(skip)]
    kind: RequestKind,
}

impl RequestProfile {
    /// Create a profile with default complexity and quality
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the prompt is blank or longer than
    /// [`MAX_PROMPT_CHARS`] characters.
    pub fn new(task_type: TaskType, prompt: impl Into<String>) -> AppResult<Self> {
        let prompt = prompt.into();

        if prompt.trim().is_empty() {
            return Err(AppError::Validation(
                "prompt cannot be empty or contain only whitespace".to_string(),
            ));
        }

        // Count Unicode characters, not bytes
        let char_count = prompt.chars().count();
        if char_count > MAX_PROMPT_CHARS {
            return Err(AppError::Validation(format!(
                "prompt exceeds maximum length of {} characters (got {})",
                MAX_PROMPT_CHARS, char_count
            )));
        }

        Ok(Self {
            task_type,
            complexity: Complexity::default(),
            quality: Quality::default(),
            prompt,
            max_cost: None,
            prefer_self_hosted: None,
            estimated_tokens: None,
            kind: RequestKind::for_task(task_type),
        })
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Cap the estimated per-request cost in USD
    ///
    /// # Errors
    /// Returns `AppError::Validation` if `max_cost` is negative or not finite.
    pub fn with_max_cost(mut self, max_cost: f64) -> AppResult<Self> {
        if !max_cost.is_finite() || max_cost < 0.0 {
            return Err(AppError::Validation(format!(
                "max_cost must be a finite non-negative number, got {}",
                max_cost
            )));
        }
        self.max_cost = Some(max_cost);
        Ok(self)
    }

    pub fn with_prefer_self_hosted(mut self, prefer: bool) -> Self {
        self.prefer_self_hosted = Some(prefer);
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_cost(&self) -> Option<f64> {
        self.max_cost
    }

    pub fn prefer_self_hosted(&self) -> Option<bool> {
        self.prefer_self_hosted
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Caller-supplied token estimate, or chars / 4 of the prompt
    pub fn estimated_tokens(&self) -> u32 {
        self.estimated_tokens
            .unwrap_or_else(|| estimate_tokens(&self.prompt))
    }
}

/// Estimate token count from a prompt string (simple heuristic: chars / 4)
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
}

/// Validates during deserialization - invalid profiles cannot exist
impl<'de> Deserialize<'de> for RequestProfile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawRequestProfile {
            #[serde(default)]
            task_type: TaskType,
            #[serde(default)]
            complexity: Complexity,
            #[serde(default)]
            quality: Quality,
            prompt: String,
            max_cost: Option<f64>,
            prefer_self_hosted: Option<bool>,
            estimated_tokens: Option<u32>,
        }

        let raw = RawRequestProfile::deserialize(deserializer)?;

        let mut profile = RequestProfile::new(raw.task_type, raw.prompt)
            .map_err(serde::de::Error::custom)?
            .with_complexity(raw.complexity)
            .with_quality(raw.quality);

        if let Some(max_cost) = raw.max_cost {
            profile = profile
                .with_max_cost(max_cost)
                .map_err(serde::de::Error::custom)?;
        }
        profile.prefer_self_hosted = raw.prefer_self_hosted;
        profile.estimated_tokens = raw.estimated_tokens;

        Ok(profile)
    }
}
