//! Candidate selection
//!
//! Turns a request profile into an ordered candidate list. Ordering is fully
//! deterministic: tier ascending, then the task-preference table, then
//! quality descending. Cost filters run last so the error can say which one
//! emptied the list.

use crate::catalog::{CandidateBackend, Catalog};
use crate::error::{AppError, AppResult};
use crate::ledger::{BudgetDecision, CostLedger};
use crate::router::{Complexity, RequestProfile};
use std::cmp::Ordering;
use std::sync::Arc;

/// Minimum quality score for high-complexity requests
pub const HIGH_COMPLEXITY_QUALITY_FLOOR: f64 = 8.5;

pub struct SelectionEngine {
    catalog: Arc<Catalog>,
    ledger: Arc<CostLedger>,
}

impl SelectionEngine {
    pub fn new(catalog: Arc<Catalog>, ledger: Arc<CostLedger>) -> Self {
        Self { catalog, ledger }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Rank the candidates able to serve `profile` for `account_id`
    ///
    /// # Errors
    /// - `AppError::Config` when no backend declares the capability, or none
    ///   meets the high-complexity quality floor
    /// - `AppError::Validation` when the prompt exceeds every capable
    ///   backend's context window
    /// - `AppError::NoAffordableCandidate` when `max_cost` removed everything
    /// - `AppError::BudgetExceeded` when the account can afford none of the
    ///   remaining priced candidates
    pub fn rank(
        &self,
        profile: &RequestProfile,
        account_id: &str,
    ) -> AppResult<Vec<CandidateBackend>> {
        let task = profile.task_type();
        let kind = profile.kind();
        let tokens = profile.estimated_tokens();

        let capable: Vec<&CandidateBackend> = self
            .catalog
            .backends()
            .iter()
            .filter(|b| b.serves(task, kind))
            .collect();

        if capable.is_empty() {
            let accepted = if kind.is_generation() {
                format!("'{}'", task)
            } else {
                format!("'{}' or 'general'", task)
            };
            tracing::error!(task_type = %task, "No backend in the catalog declares a matching capability");
            return Err(AppError::Config(format!(
                "no backend declares the {} capability",
                accepted
            )));
        }

        let mut ranked: Vec<&CandidateBackend> = capable
            .into_iter()
            .filter(|b| b.max_context_tokens() >= tokens)
            .collect();
        if ranked.is_empty() {
            return Err(AppError::Validation(format!(
                "prompt of ~{} tokens exceeds the context window of every '{}' backend",
                tokens, task
            )));
        }

        if profile.complexity() == Complexity::High {
            ranked.retain(|b| b.quality_score() >= HIGH_COMPLEXITY_QUALITY_FLOOR);
            if ranked.is_empty() {
                return Err(AppError::Config(format!(
                    "no '{}' backend meets the quality floor of {} for high-complexity requests",
                    task, HIGH_COMPLEXITY_QUALITY_FLOOR
                )));
            }
        }

        ranked.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then_with(|| self.compare_preference(profile, a, b))
                .then_with(|| b.quality_score().total_cmp(&a.quality_score()))
        });

        if profile.prefer_self_hosted() == Some(true) {
            // Stable: tier and preference order survive within each group
            ranked.sort_by_key(|b| !b.self_hosted());
        }

        if let Some(max_cost) = profile.max_cost() {
            ranked.retain(|b| b.cost_for_tokens(tokens) <= max_cost);
            if ranked.is_empty() {
                return Err(AppError::NoAffordableCandidate { max_cost });
            }
        }

        let mut denial = None;
        ranked.retain(|b| {
            if b.is_free() {
                return true;
            }
            match self.ledger.check_budget(account_id, b.cost_for_tokens(tokens)) {
                BudgetDecision::Allow => true,
                deny @ BudgetDecision::Deny { .. } => {
                    denial = Some(deny);
                    false
                }
            }
        });
        if ranked.is_empty() {
            let (spend_usd, limit_usd) = match denial {
                Some(BudgetDecision::Deny {
                    spend_usd,
                    limit_usd,
                }) => (spend_usd, limit_usd),
                _ => (0.0, 0.0),
            };
            return Err(AppError::BudgetExceeded {
                account: account_id.to_string(),
                spend_usd,
                limit_usd,
            });
        }

        tracing::debug!(
            task_type = %task,
            candidates = ranked.len(),
            first = %ranked[0],
            "Ranked candidates"
        );

        Ok(ranked.into_iter().cloned().collect())
    }

    /// Preferred models first, in table order; unlisted models tie
    fn compare_preference(
        &self,
        profile: &RequestProfile,
        a: &CandidateBackend,
        b: &CandidateBackend,
    ) -> Ordering {
        let task = profile.task_type();
        match (
            self.catalog.preference_rank(task, a.model_id()),
            self.catalog.preference_rank(task, b.model_id()),
        ) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}
