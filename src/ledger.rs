//! Per-account monthly cost ledger
//!
//! Accounts are created on their first recorded cost with the configured
//! default limit, or the limit from a matching `[[budget.accounts]]` entry.
//! Budget checks never create accounts. Spend only grows within a period;
//! `rollover()` starts a new one.

use crate::config::BudgetConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Spend state of one account for the current period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAccount {
    monthly_limit_usd: f64,
    current_month_spend_usd: f64,
    alert_threshold: f64,
    hard_limit_reached: bool,
    #[serde(skip)]
    alert_logged: bool,
}

impl CostAccount {
    fn new(monthly_limit_usd: f64, alert_threshold: f64) -> Self {
        Self {
            monthly_limit_usd,
            current_month_spend_usd: 0.0,
            alert_threshold,
            hard_limit_reached: false,
            alert_logged: false,
        }
    }

    pub fn monthly_limit_usd(&self) -> f64 {
        self.monthly_limit_usd
    }

    pub fn current_month_spend_usd(&self) -> f64 {
        self.current_month_spend_usd
    }

    pub fn alert_threshold(&self) -> f64 {
        self.alert_threshold
    }

    pub fn hard_limit_reached(&self) -> bool {
        self.hard_limit_reached
    }

    pub fn remaining_usd(&self) -> f64 {
        (self.monthly_limit_usd - self.current_month_spend_usd).max(0.0)
    }
}

/// Answer to "may this account spend `estimated_cost` more?"
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetDecision {
    Allow,
    Deny { spend_usd: f64, limit_usd: f64 },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// One priced dispatch, as handed to the usage sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub account_id: String,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub tokens: u32,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence hook for usage records
///
/// Called synchronously while the ledger records a cost, so implementations
/// must not block. Forward to a channel if persistence is slow.
pub trait UsageSink: Send + Sync {
    fn record_usage(&self, record: &UsageRecord);
}

/// Default sink: one structured log line per record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsageSink;

impl UsageSink for LogUsageSink {
    fn record_usage(&self, record: &UsageRecord) {
        tracing::info!(
            account_id = %record.account_id,
            request_id = %record.request_id,
            provider = %record.provider,
            model = %record.model,
            tokens = record.tokens,
            cost_usd = record.cost_usd,
            "Usage recorded"
        );
    }
}

pub struct CostLedger {
    budget: BudgetConfig,
    accounts: Mutex<HashMap<String, CostAccount>>,
    sink: Arc<dyn UsageSink>,
}

impl CostLedger {
    pub fn new(budget: BudgetConfig) -> Self {
        Self::with_sink(budget, Arc::new(LogUsageSink))
    }

    pub fn with_sink(budget: BudgetConfig, sink: Arc<dyn UsageSink>) -> Self {
        Self {
            budget,
            accounts: Mutex::new(HashMap::new()),
            sink,
        }
    }

    fn account_entry<'a>(
        &self,
        accounts: &'a mut HashMap<String, CostAccount>,
        account_id: &str,
    ) -> &'a mut CostAccount {
        accounts.entry(account_id.to_string()).or_insert_with(|| {
            let (limit, threshold) = self.budget.limits_for(account_id);
            CostAccount::new(limit, threshold)
        })
    }

    /// Decide whether `account_id` may spend `estimated_cost` more
    ///
    /// Zero-cost work is always admitted. Otherwise the request is denied once
    /// the hard limit has been reached or if it would push spend past the limit.
    pub fn check_budget(&self, account_id: &str, estimated_cost: f64) -> BudgetDecision {
        if estimated_cost <= 0.0 {
            return BudgetDecision::Allow;
        }

        let (spend, limit, hard_limit_reached) = match self.accounts.lock().get(account_id) {
            Some(account) => (
                account.current_month_spend_usd,
                account.monthly_limit_usd,
                account.hard_limit_reached,
            ),
            None => (0.0, self.budget.limits_for(account_id).0, false),
        };

        if hard_limit_reached || spend + estimated_cost > limit {
            BudgetDecision::Deny {
                spend_usd: spend,
                limit_usd: limit,
            }
        } else {
            BudgetDecision::Allow
        }
    }

    /// Add an actual cost to the account and forward it to the usage sink
    ///
    /// Zero cost leaves the total untouched and is not forwarded.
    pub fn record(&self, record: UsageRecord) {
        let cost = record.cost_usd;
        let account_id = record.account_id.as_str();
        if !(cost.is_finite() && cost > 0.0) {
            return;
        }

        let mut accounts = self.accounts.lock();
        let account = self.account_entry(&mut accounts, account_id);
        account.current_month_spend_usd += cost;

        let spend = account.current_month_spend_usd;
        let limit = account.monthly_limit_usd;

        if !account.alert_logged && spend >= account.alert_threshold * limit {
            account.alert_logged = true;
            tracing::warn!(
                account_id = %account_id,
                spend_usd = spend,
                limit_usd = limit,
                alert_threshold = account.alert_threshold,
                "Account crossed budget alert threshold"
            );
        }

        if !account.hard_limit_reached && spend >= limit {
            account.hard_limit_reached = true;
            tracing::warn!(
                account_id = %account_id,
                spend_usd = spend,
                limit_usd = limit,
                "Account reached monthly budget limit, priced dispatch refused until rollover"
            );
        }
        drop(accounts);

        self.sink.record_usage(&record);
    }

    /// `Some((spend, limit))` when the account's hard limit has been reached
    pub fn exhausted(&self, account_id: &str) -> Option<(f64, f64)> {
        let accounts = self.accounts.lock();
        accounts
            .get(account_id)
            .filter(|a| a.hard_limit_reached)
            .map(|a| (a.current_month_spend_usd, a.monthly_limit_usd))
    }

    /// Snapshot of an account; `None` if it has not been seen this period
    pub fn account(&self, account_id: &str) -> Option<CostAccount> {
        self.accounts.lock().get(account_id).cloned()
    }

    /// Start a new budget period for every account
    pub fn rollover(&self) {
        let mut accounts = self.accounts.lock();
        let count = accounts.len();
        accounts.clear();
        tracing::info!(accounts = count, "Budget period rolled over");
    }
}
