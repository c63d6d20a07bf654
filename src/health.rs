//! Health tracking for providers
//!
//! Availability is fed by dispatch outcomes and by periodic probes. It is a
//! status surface for operators only: selection never consults it.
//!
//! Outcome updates take a synchronous lock and never await.

use crate::backends::BackendRegistry;
use crate::config::HealthConfig;
use crate::metrics::Metrics;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Health state of one provider
#[derive(Clone, Debug)]
pub struct ProviderHealth {
    provider: String,
    available: bool,
    last_check: Instant,
    consecutive_failures: u32,
}

impl ProviderHealth {
    fn new(provider: String) -> Self {
        Self {
            provider,
            available: true,
            last_check: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn last_check(&self) -> Instant {
        self.last_check
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Serializable view for `/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub available: bool,
    pub consecutive_failures: u32,
}

/// Tracks provider availability
///
/// - `failure_threshold` consecutive failures → unavailable
/// - 1 success → available again
pub struct HealthTracker {
    status: RwLock<HashMap<String, ProviderHealth>>,
    failure_threshold: u32,
    probe_interval: Duration,
    probe_timeout: Duration,
    probes_enabled: bool,
    backends: BackendRegistry,
}

impl HealthTracker {
    /// Start every registered provider as available
    pub fn new(backends: BackendRegistry, config: &HealthConfig) -> Self {
        let status: HashMap<String, ProviderHealth> = backends
            .provider_ids()
            .into_iter()
            .map(|id| (id.clone(), ProviderHealth::new(id)))
            .collect();

        tracing::info!(
            total_providers = status.len(),
            failure_threshold = config.failure_threshold,
            "HealthTracker initialized with all providers available"
        );

        Self {
            status: RwLock::new(status),
            failure_threshold: config.failure_threshold.max(1),
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            probes_enabled: config.enabled,
            backends,
        }
    }

    /// Unknown providers are reported unavailable
    pub fn is_available(&self, provider: &str) -> bool {
        self.status
            .read()
            .get(provider)
            .map(|h| h.available)
            .unwrap_or(false)
    }

    pub fn mark_failure(&self, provider: &str) {
        let mut status = self.status.write();

        let Some(health) = status.get_mut(provider) else {
            tracing::warn!(provider = %provider, "Attempted to mark failure for unknown provider");
            return;
        };

        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_check = Instant::now();

        if health.consecutive_failures >= self.failure_threshold {
            if health.available {
                tracing::warn!(
                    provider = %health.provider,
                    consecutive_failures = health.consecutive_failures,
                    "Provider marked unavailable"
                );
            }
            health.available = false;
        } else {
            tracing::debug!(
                provider = %health.provider,
                consecutive_failures = health.consecutive_failures,
                "Provider failure recorded (still available)"
            );
        }
    }

    pub fn mark_success(&self, provider: &str) {
        let mut status = self.status.write();

        let Some(health) = status.get_mut(provider) else {
            tracing::warn!(provider = %provider, "Attempted to mark success for unknown provider");
            return;
        };

        if !health.available {
            tracing::info!(provider = %health.provider, "Provider recovered");
        }
        health.consecutive_failures = 0;
        health.available = true;
        health.last_check = Instant::now();
    }

    /// All providers, sorted by id
    pub fn get_all_statuses(&self) -> Vec<ProviderStatus> {
        let status = self.status.read();
        let mut all: Vec<ProviderStatus> = status
            .values()
            .map(|h| ProviderStatus {
                provider: h.provider.clone(),
                available: h.available,
                consecutive_failures: h.consecutive_failures,
            })
            .collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    /// Probe every provider once
    pub async fn run_probes(&self) {
        for provider in self.backends.provider_ids() {
            let Some(invoker) = self.backends.get(&provider) else {
                continue;
            };
            match invoker.probe(self.probe_timeout).await {
                Ok(()) => self.mark_success(&provider),
                Err(e) => {
                    tracing::debug!(provider = %provider, error = %e, "Probe failed");
                    self.mark_failure(&provider);
                }
            }
        }
    }

    /// Spawn the periodic probe loop plus a monitor that reports its death
    pub fn start_background_probes(self: Arc<Self>, metrics: Metrics) {
        if !self.probes_enabled {
            tracing::info!("Background provider probes disabled");
            return;
        }

        let interval = self.probe_interval;
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background provider probes"
            );
            loop {
                tokio::time::sleep(interval).await;
                self.run_probes().await;
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    metrics.background_task_failure("unexpected_termination");
                    tracing::error!(
                        "Background probe task terminated unexpectedly. \
                        Provider availability will no longer be refreshed by probes."
                    );
                }
                Err(e) => {
                    metrics.background_task_failure("panic");
                    tracing::error!(
                        error = %e,
                        "Background probe task panicked. \
                        Provider availability will no longer be refreshed by probes."
                    );
                }
            }
        });
    }
}
