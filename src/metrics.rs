//! Prometheus metrics collection for tierroute
//!
//! This module provides metrics instrumentation for tracking:
//! - Route outcomes (served, cache hit, fallback, policy rejections)
//! - Cache lookups by result
//! - Dispatch attempts and latency by provider
//! - Spend by provider
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Recording failures never fail a request: they are logged and counted.

use crate::router::AttemptOutcome;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final outcome of one `route` call
///
/// Enum labels keep cardinality fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A backend produced the answer
    Served,
    /// Answered from the response cache
    CacheHit,
    /// Every candidate failed; the fallback envelope was returned
    Fallback,
    /// Short-circuited by a policy (rate limit, budget, cost cap)
    Rejected,
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Served => "served",
            Self::CacheHit => "cache_hit",
            Self::Fallback => "fallback",
            Self::Rejected => "rejected",
        }
    }
}

/// Why a request was refused before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    RateLimited,
    BudgetExceeded,
    NoAffordableCandidate,
}

impl PolicyRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::BudgetExceeded => "budget_exceeded",
            Self::NoAffordableCandidate => "no_affordable_candidate",
        }
    }
}

/// Metrics collector for tierroute
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    routes_total: IntCounterVec,
    cache_lookups: IntCounterVec,
    dispatch_attempts: IntCounterVec,
    dispatch_duration: HistogramVec,
    spend_usd: CounterVec,
    policy_rejections: IntCounterVec,
    metrics_recording_failures: IntCounterVec,
    background_task_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let routes_total = IntCounterVec::new(
            Opts::new(
                "tierroute_routes_total",
                "Total number of routed requests by final outcome",
            ),
            &["outcome"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "tierroute_cache_lookups_total",
                "Response cache lookups by result (hit, miss)",
            ),
            &["result"],
        )?;

        // Cardinality: providers come from configuration, outcomes are an enum
        let dispatch_attempts = IntCounterVec::new(
            Opts::new(
                "tierroute_dispatch_attempts_total",
                "Backend invocation attempts by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "tierroute_dispatch_duration_ms",
                "Latency of a single backend attempt in milliseconds",
            )
            .buckets(vec![
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["provider"],
        )?;

        let spend_usd = CounterVec::new(
            Opts::new(
                "tierroute_spend_usd_total",
                "Recorded spend in USD by provider",
            ),
            &["provider"],
        )?;

        let policy_rejections = IntCounterVec::new(
            Opts::new(
                "tierroute_policy_rejections_total",
                "Requests refused before dispatch by reason",
            ),
            &["reason"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "tierroute_metrics_recording_failures_total",
                "Total number of metrics recording operation failures by operation. \
                Indicates Prometheus internal errors - frequent failures require investigation.",
            ),
            &["operation"],
        )?;

        let background_task_failures = IntCounterVec::new(
            Opts::new(
                "tierroute_background_task_failures_total",
                "Background provider probe task failures. Alert on ANY increment.",
            ),
            &["failure_type"],
        )?;

        registry.register(Box::new(routes_total.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(dispatch_attempts.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;
        registry.register(Box::new(spend_usd.clone()))?;
        registry.register(Box::new(policy_rejections.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            routes_total,
            cache_lookups,
            dispatch_attempts,
            dispatch_duration,
            spend_usd,
            policy_rejections,
            metrics_recording_failures,
            background_task_failures,
        })
    }

    pub fn record_route(&self, outcome: RouteOutcome) -> Result<(), prometheus::Error> {
        self.routes_total
            .get_metric_with_label_values(&[outcome.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_cache_lookup(&self, hit: bool) -> Result<(), prometheus::Error> {
        let label = if hit { "hit" } else { "miss" };
        self.cache_lookups
            .get_metric_with_label_values(&[label])?
            .inc();
        Ok(())
    }

    /// Record one dispatch attempt and its latency
    ///
    /// # Errors
    ///
    /// Returns an error if `latency_ms` is NaN, infinite or negative, since
    /// such values corrupt every percentile of the histogram.
    pub fn record_attempt(
        &self,
        provider: &str,
        outcome: AttemptOutcome,
        latency_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                latency_ms
            )));
        }

        self.dispatch_attempts
            .get_metric_with_label_values(&[provider, outcome.as_str()])?
            .inc();
        self.dispatch_duration
            .get_metric_with_label_values(&[provider])?
            .observe(latency_ms);
        Ok(())
    }

    pub fn record_spend(&self, provider: &str, cost_usd: f64) -> Result<(), prometheus::Error> {
        if !cost_usd.is_finite() || cost_usd < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Spend must be finite and non-negative, got: {}",
                cost_usd
            )));
        }
        self.spend_usd
            .get_metric_with_label_values(&[provider])?
            .inc_by(cost_usd);
        Ok(())
    }

    pub fn record_rejection(&self, reason: PolicyRejection) -> Result<(), prometheus::Error> {
        self.policy_rejections
            .get_metric_with_label_values(&[reason.as_str()])?
            .inc();
        Ok(())
    }

    /// Log and count a failed recording; the request continues
    pub fn report(&self, operation: &'static str, result: Result<(), prometheus::Error>) {
        if let Err(e) = result {
            self.metrics_recording_failure(operation);
            tracing::error!(
                error = %e,
                operation,
                "Metrics recording failed. Observability degraded but request continues."
            );
        }
    }

    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    pub fn metrics_recording_failures_count(&self) -> u64 {
        Self::sum_family(&self.registry, "tierroute_metrics_recording_failures_total")
    }

    /// Count a probe task restart (`panic` or `unexpected_termination`)
    pub fn background_task_failure(&self, failure_type: &str) {
        self.background_task_failures
            .with_label_values(&[failure_type])
            .inc();
    }

    pub fn background_task_failures_count(&self) -> u64 {
        Self::sum_family(&self.registry, "tierroute_background_task_failures_total")
    }

    fn sum_family(registry: &Registry, name: &str) -> u64 {
        registry
            .gather()
            .iter()
            .find(|mf| mf.name() == name)
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}
