//! Dispatch executor: walks the ranked candidates until one succeeds
//!
//! Each candidate gets one attempt plus up to `retry_budget` retries for
//! transient failures, with exponential backoff between retries. A fatal
//! failure abandons the candidate immediately. Running out of candidates is
//! a normal outcome (`Exhausted`), not an error.

use crate::backends::{BackendRegistry, InvokeContext, Invocation};
use crate::catalog::CandidateBackend;
use crate::config::DispatchConfig;
use crate::error::{FailureClass, InvokeError};
use crate::health::HealthTracker;
use crate::ledger::CostLedger;
use crate::metrics::Metrics;
use crate::middleware::RequestId;
use crate::router::RequestProfile;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum backoff duration in milliseconds (30 seconds)
///
/// Prevents unbounded sleep from exponential growth. With base=1000ms:
/// - Retry 5 would be 16 seconds (under cap)
/// - Retry 6 would be 32 seconds (capped to 30s)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Timeout and retry settings for the executor
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempt_timeout: Duration,
    /// Extra attempts per candidate after a transient failure
    retry_budget: u32,
    /// Base backoff in milliseconds (doubles each retry)
    retry_backoff_ms: u64,
}

impl RetryPolicy {
    /// # Errors
    /// Returns an error if `attempt_timeout` is zero
    pub fn new(
        attempt_timeout: Duration,
        retry_budget: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, &'static str> {
        if attempt_timeout.is_zero() {
            return Err("attempt_timeout must be greater than zero");
        }
        Ok(Self {
            attempt_timeout,
            retry_budget,
            retry_backoff_ms,
        })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, &'static str> {
        Self::new(
            Duration::from_secs(config.attempt_timeout_seconds),
            config.retry_budget,
            config.retry_backoff_ms,
        )
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    pub fn retry_backoff_ms(&self) -> u64 {
        self.retry_backoff_ms
    }

    /// Attempts allowed per candidate: the first plus every retry
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }
}

/// Calculate exponential backoff with overflow protection
///
/// The formula is `base * 2^(retry-1)`, capped at [`MAX_BACKOFF_MS`].
/// With base=1000ms: retry 1 → 1s, retry 2 → 2s, retry 3 → 4s.
pub fn calculate_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let exponent = retry.saturating_sub(1);
    policy
        .retry_backoff_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}

/// Result label of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    FatalFailure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientFailure => "transient_failure",
            Self::FatalFailure => "fatal_failure",
        }
    }
}

impl From<FailureClass> for AttemptOutcome {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Transient => Self::TransientFailure,
            FailureClass::Fatal => Self::FatalFailure,
        }
    }
}

/// One invocation attempt, kept for the response provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchAttempt {
    pub provider: String,
    pub model: String,
    /// 1-based attempt number for this candidate
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Served {
        invocation: Invocation,
        candidate: CandidateBackend,
        attempts: Vec<DispatchAttempt>,
    },
    Exhausted {
        attempts: Vec<DispatchAttempt>,
    },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> &[DispatchAttempt] {
        match self {
            Self::Served { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }
}

pub struct DispatchExecutor {
    backends: BackendRegistry,
    policy: RetryPolicy,
    max_output_tokens: u32,
    ledger: Arc<CostLedger>,
    health: Arc<HealthTracker>,
    metrics: Metrics,
}

impl DispatchExecutor {
    pub fn new(
        backends: BackendRegistry,
        policy: RetryPolicy,
        max_output_tokens: u32,
        ledger: Arc<CostLedger>,
        health: Arc<HealthTracker>,
        metrics: Metrics,
    ) -> Self {
        Self {
            backends,
            policy,
            max_output_tokens,
            ledger,
            health,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Try `ranked` in order until one candidate succeeds
    ///
    /// Cancel-safe: dropping the future abandons the in-flight attempt and
    /// nothing has been recorded against the ledger. Once an invocation
    /// succeeds there is no further await point, so the caller receives
    /// `Served` in the same poll and can record its cost.
    pub async fn dispatch(
        &self,
        profile: &RequestProfile,
        ranked: &[CandidateBackend],
        account_id: &str,
        request_id: RequestId,
    ) -> DispatchOutcome {
        let mut attempts = Vec::new();
        let ctx = InvokeContext {
            request_id,
            kind: profile.kind(),
            timeout: self.policy.attempt_timeout,
        };

        for candidate in ranked {
            if !candidate.is_free() {
                let estimate = candidate.cost_for_tokens(profile.estimated_tokens());
                if !self.ledger.check_budget(account_id, estimate).is_allowed() {
                    tracing::info!(
                        request_id = %request_id,
                        provider = %candidate.provider_id(),
                        model = %candidate.model_id(),
                        estimated_cost_usd = estimate,
                        "Skipping candidate the account can no longer afford"
                    );
                    continue;
                }
            }

            let Some(invoker) = self.backends.get(candidate.provider_id()) else {
                tracing::error!(
                    request_id = %request_id,
                    provider = %candidate.provider_id(),
                    "No invoker registered for provider"
                );
                let now = Utc::now();
                attempts.push(DispatchAttempt {
                    provider: candidate.provider_id().to_string(),
                    model: candidate.model_id().to_string(),
                    attempt: 1,
                    started_at: now,
                    finished_at: now,
                    latency_ms: 0,
                    outcome: AttemptOutcome::FatalFailure,
                    error: Some("no invoker registered for provider".to_string()),
                });
                continue;
            };

            for attempt in 1..=self.policy.max_attempts() {
                tracing::debug!(
                    request_id = %request_id,
                    provider = %candidate.provider_id(),
                    model = %candidate.model_id(),
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    "Attempting backend invocation"
                );

                let started_at = Utc::now();
                let start = Instant::now();
                let result = match tokio::time::timeout(
                    self.policy.attempt_timeout,
                    invoker.invoke(candidate, profile.prompt(), self.max_output_tokens, &ctx),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(InvokeError::Timeout {
                        provider: candidate.provider_id().to_string(),
                        timeout_seconds: self.policy.attempt_timeout.as_secs(),
                    }),
                };
                let elapsed = start.elapsed();
                let finished_at = Utc::now();
                let latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

                let (outcome, error) = match &result {
                    Ok(_) => (AttemptOutcome::Success, None),
                    Err(e) => (AttemptOutcome::from(e.class()), Some(e.to_string())),
                };
                attempts.push(DispatchAttempt {
                    provider: candidate.provider_id().to_string(),
                    model: candidate.model_id().to_string(),
                    attempt,
                    started_at,
                    finished_at,
                    latency_ms,
                    outcome,
                    error,
                });
                self.metrics.report(
                    "record_attempt",
                    self.metrics.record_attempt(
                        candidate.provider_id(),
                        outcome,
                        elapsed.as_secs_f64() * 1000.0,
                    ),
                );

                match result {
                    Ok(invocation) => {
                        self.health.mark_success(candidate.provider_id());
                        tracing::info!(
                            request_id = %request_id,
                            provider = %candidate.provider_id(),
                            model = %candidate.model_id(),
                            attempt,
                            latency_ms,
                            tokens_used = invocation.tokens_used,
                            placeholder = invocation.placeholder,
                            "Backend invocation succeeded"
                        );
                        return DispatchOutcome::Served {
                            invocation,
                            candidate: candidate.clone(),
                            attempts,
                        };
                    }
                    Err(e) => {
                        self.health.mark_failure(candidate.provider_id());
                        tracing::warn!(
                            request_id = %request_id,
                            provider = %candidate.provider_id(),
                            model = %candidate.model_id(),
                            attempt,
                            error_kind = e.kind(),
                            error = %e,
                            "Backend invocation failed"
                        );

                        if e.class() == FailureClass::Fatal {
                            break;
                        }
                        if attempt < self.policy.max_attempts() {
                            let backoff_ms = calculate_backoff(&self.policy, attempt);
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        }
                    }
                }
            }
        }

        tracing::error!(
            request_id = %request_id,
            candidates = ranked.len(),
            attempts = attempts.len(),
            "All candidates exhausted"
        );
        DispatchOutcome::Exhausted { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(retry_budget: u32, base: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), retry_budget, base).expect("valid policy")
    }

    #[test]
    fn test_policy_from_default_config() {
        let policy = RetryPolicy::from_config(&DispatchConfig::default()).unwrap();
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(policy.retry_budget(), 2);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.retry_backoff_ms(), 1_000);
    }

    #[test]
    fn test_policy_rejects_zero_timeout() {
        assert!(RetryPolicy::new(Duration::ZERO, 2, 1000).is_err());
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        let policy = policy(5, 1000);
        assert_eq!(calculate_backoff(&policy, 1), 1_000);
        assert_eq!(calculate_backoff(&policy, 2), 2_000);
        assert_eq!(calculate_backoff(&policy, 3), 4_000);
    }

    #[test]
    fn test_backoff_capped_at_maximum() {
        let policy = policy(100, 1000);
        assert_eq!(calculate_backoff(&policy, 6), MAX_BACKOFF_MS);
        assert_eq!(calculate_backoff(&policy, 64), MAX_BACKOFF_MS);
        assert_eq!(calculate_backoff(&policy, u32::MAX), MAX_BACKOFF_MS);
    }

    #[test]
    fn test_backoff_retry_zero_treated_as_one() {
        assert_eq!(calculate_backoff(&policy(3, 100), 0), 100);
    }

    #[test]
    fn test_attempt_outcome_labels() {
        assert_eq!(
            AttemptOutcome::from(FailureClass::Transient),
            AttemptOutcome::TransientFailure
        );
        assert_eq!(AttemptOutcome::FatalFailure.as_str(), "fatal_failure");
        assert_eq!(
            serde_json::to_string(&AttemptOutcome::Success).unwrap(),
            r#""success""#
        );
    }
}
