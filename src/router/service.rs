//! Router facade
//!
//! `RouterService` owns every store and runs one request through
//! CacheCheck → BudgetCheck → RateCheck → Select → Dispatch → Record → Respond.
//! Policy refusals come back as `AppError`; exhausting every candidate is a
//! normal response whose provider is `"fallback"`.

use crate::backends::BackendRegistry;
use crate::cache::{CacheStats, CachedResponse, ResponseCache};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::health::{HealthTracker, ProviderStatus};
use crate::ledger::{CostLedger, UsageRecord};
use crate::limiter::{RateDecision, RateLimiter};
use crate::metrics::{Metrics, PolicyRejection, RouteOutcome};
use crate::middleware::RequestId;
use crate::router::dispatch::{DispatchAttempt, DispatchExecutor, DispatchOutcome, RetryPolicy};
use crate::router::selection::SelectionEngine;
use crate::router::RequestProfile;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

/// Provider name reported when every candidate failed
pub const FALLBACK_PROVIDER: &str = "fallback";

/// Answer text returned when every candidate failed
pub const FALLBACK_MESSAGE: &str =
    "All AI providers are currently unavailable. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// Provenance of the answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelUsed {
    pub provider: String,
    pub model: String,
    pub cost_usd: f64,
    pub tokens: u32,
    pub latency_ms: u64,
    pub is_self_hosted: bool,
}

/// Uniform response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterResponse {
    pub result: String,
    pub model_used: ModelUsed,
    pub attempts: Vec<DispatchAttempt>,
    pub cache_status: CacheStatus,
}

impl RouterResponse {
    pub fn is_fallback(&self) -> bool {
        self.model_used.provider == FALLBACK_PROVIDER
    }

    fn from_cache(cached: CachedResponse) -> Self {
        Self {
            result: cached.result,
            model_used: ModelUsed {
                provider: cached.provider,
                model: cached.model,
                cost_usd: 0.0,
                tokens: cached.tokens,
                latency_ms: 0,
                is_self_hosted: cached.is_self_hosted,
            },
            attempts: Vec::new(),
            cache_status: CacheStatus::Hit,
        }
    }

    fn fallback(attempts: Vec<DispatchAttempt>, latency_ms: u64) -> Self {
        Self {
            result: FALLBACK_MESSAGE.to_string(),
            model_used: ModelUsed {
                provider: FALLBACK_PROVIDER.to_string(),
                model: "none".to_string(),
                cost_usd: 0.0,
                tokens: 0,
                latency_ms,
                is_self_hosted: false,
            },
            attempts,
            cache_status: CacheStatus::Miss,
        }
    }
}

/// Operator view of the router's stores
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub cache: CacheStats,
    pub rate_limited_identities: usize,
    pub tracked_identities: usize,
    pub providers: Vec<ProviderStatus>,
}

pub struct RouterService {
    cache: ResponseCache,
    limiter: RateLimiter,
    ledger: Arc<CostLedger>,
    selection: SelectionEngine,
    executor: DispatchExecutor,
    health: Arc<HealthTracker>,
    metrics: Metrics,
}

impl RouterService {
    /// Build the service with invokers for every configured provider
    pub fn from_config(config: &Config, metrics: Metrics) -> AppResult<Self> {
        let backends = BackendRegistry::from_config(config)?;
        let ledger = Arc::new(CostLedger::new(config.budget.clone()));
        Self::new(config, backends, ledger, metrics)
    }

    /// Build the service around caller-supplied invokers and ledger
    pub fn new(
        config: &Config,
        backends: BackendRegistry,
        ledger: Arc<CostLedger>,
        metrics: Metrics,
    ) -> AppResult<Self> {
        let policy = RetryPolicy::from_config(&config.dispatch)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let catalog = Arc::new(Catalog::from_config(config));
        let health = Arc::new(HealthTracker::new(backends.clone(), &config.health));

        tracing::info!(
            backends = catalog.len(),
            providers = backends.len(),
            retry_budget = policy.retry_budget(),
            attempt_timeout_seconds = policy.attempt_timeout().as_secs(),
            "Router service initialized"
        );

        Ok(Self {
            cache: ResponseCache::new(&config.cache),
            limiter: RateLimiter::new(&config.rate_limit),
            selection: SelectionEngine::new(catalog, ledger.clone()),
            executor: DispatchExecutor::new(
                backends,
                policy,
                config.dispatch.max_output_tokens,
                ledger.clone(),
                health.clone(),
                metrics.clone(),
            ),
            ledger,
            health,
            metrics,
        })
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Route one request with a fresh request id
    pub async fn route(
        &self,
        profile: &RequestProfile,
        account_id: &str,
        client_identity: &str,
    ) -> AppResult<RouterResponse> {
        self.route_with_id(profile, account_id, client_identity, RequestId::new())
            .await
    }

    pub async fn route_with_id(
        &self,
        profile: &RequestProfile,
        account_id: &str,
        client_identity: &str,
        request_id: RequestId,
    ) -> AppResult<RouterResponse> {
        // CacheCheck: a hit bypasses every policy
        let fingerprint = self.cache.fingerprint(profile);
        if self.cache.is_enabled() {
            let cached = self.cache.get(&fingerprint);
            self.metrics.report(
                "record_cache_lookup",
                self.metrics.record_cache_lookup(cached.is_some()),
            );
            if let Some(cached) = cached {
                tracing::info!(
                    request_id = %request_id,
                    provider = %cached.provider,
                    model = %cached.model,
                    "Served from response cache"
                );
                self.record_outcome(RouteOutcome::CacheHit);
                return Ok(RouterResponse::from_cache(cached));
            }
        }

        // BudgetCheck: an exhausted account can still use free backends
        if let Some((spend_usd, limit_usd)) = self.ledger.exhausted(account_id)
            && !self
                .selection
                .catalog()
                .has_free_capability(profile.task_type(), profile.kind())
        {
            tracing::warn!(
                request_id = %request_id,
                account_id = %account_id,
                spend_usd,
                limit_usd,
                "Request refused: monthly budget exhausted"
            );
            return Err(self.reject(
                PolicyRejection::BudgetExceeded,
                AppError::BudgetExceeded {
                    account: account_id.to_string(),
                    spend_usd,
                    limit_usd,
                },
            ));
        }

        // RateCheck
        if let RateDecision::Limited { retry_after } = self.limiter.check(client_identity) {
            let retry_after_seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            tracing::warn!(
                request_id = %request_id,
                client = %client_identity,
                retry_after_seconds,
                "Request refused: rate limit exceeded"
            );
            return Err(self.reject(
                PolicyRejection::RateLimited,
                AppError::RateLimited {
                    client: client_identity.to_string(),
                    retry_after_seconds,
                },
            ));
        }

        // Select
        let ranked = match self.selection.rank(profile, account_id) {
            Ok(ranked) => ranked,
            Err(e @ AppError::BudgetExceeded { .. }) => {
                return Err(self.reject(PolicyRejection::BudgetExceeded, e));
            }
            Err(e @ AppError::NoAffordableCandidate { .. }) => {
                return Err(self.reject(PolicyRejection::NoAffordableCandidate, e));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            request_id = %request_id,
            task_type = %profile.task_type(),
            complexity = profile.complexity().as_str(),
            candidates = ranked.len(),
            "Dispatching request"
        );

        // Dispatch
        let start = Instant::now();
        let outcome = self
            .executor
            .dispatch(profile, &ranked, account_id, request_id)
            .await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Record: dispatch returns in the same poll its last invocation
        // finished, and nothing below awaits, so a dropped caller cannot lose
        // a completed attempt's cost
        match outcome {
            DispatchOutcome::Served {
                invocation,
                candidate,
                attempts,
            } => {
                let cost_usd = candidate.cost_for_tokens(invocation.tokens_used);
                if cost_usd > 0.0 {
                    self.ledger.record(UsageRecord {
                        account_id: account_id.to_string(),
                        request_id: request_id.to_string(),
                        provider: candidate.provider_id().to_string(),
                        model: candidate.model_id().to_string(),
                        tokens: invocation.tokens_used,
                        cost_usd,
                        recorded_at: Utc::now(),
                    });
                    self.metrics.report(
                        "record_spend",
                        self.metrics.record_spend(candidate.provider_id(), cost_usd),
                    );
                }

                if !invocation.placeholder {
                    self.cache.put(
                        fingerprint,
                        CachedResponse {
                            result: invocation.text.clone(),
                            provider: candidate.provider_id().to_string(),
                            model: candidate.model_id().to_string(),
                            tokens: invocation.tokens_used,
                            is_self_hosted: candidate.self_hosted(),
                        },
                    );
                }

                self.record_outcome(RouteOutcome::Served);
                Ok(RouterResponse {
                    result: invocation.text,
                    model_used: ModelUsed {
                        provider: candidate.provider_id().to_string(),
                        model: candidate.model_id().to_string(),
                        cost_usd,
                        tokens: invocation.tokens_used,
                        latency_ms,
                        is_self_hosted: candidate.self_hosted(),
                    },
                    attempts,
                    cache_status: CacheStatus::Miss,
                })
            }
            DispatchOutcome::Exhausted { attempts } => {
                self.record_outcome(RouteOutcome::Fallback);
                Ok(RouterResponse::fallback(attempts, latency_ms))
            }
        }
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            cache: self.cache.stats(),
            rate_limited_identities: self.limiter.limited_identities(),
            tracked_identities: self.limiter.tracked_identities(),
            providers: self.health.get_all_statuses(),
        }
    }

    fn record_outcome(&self, outcome: RouteOutcome) {
        self.metrics
            .report("record_route", self.metrics.record_route(outcome));
    }

    fn reject(&self, reason: PolicyRejection, error: AppError) -> AppError {
        self.metrics
            .report("record_rejection", self.metrics.record_rejection(reason));
        self.record_outcome(RouteOutcome::Rejected);
        error
    }
}
