//! End-to-end routing through `RouterService` with scripted providers
//!
//! Catalog: local (tier 0, chat) → free-cloud (tier 1, chat/code) →
//! paid (tier 2, general/code/analysis, priced).

mod common;

use chrono::Utc;
use common::{Step, ScriptedInvoker, fixture_config, harness, harness_with};
use tierroute::error::AppError;
use tierroute::ledger::UsageRecord;
use tierroute::router::{
    AttemptOutcome, CacheStatus, Complexity, RequestProfile, TaskType,
};

fn chat(prompt: &str) -> RequestProfile {
    RequestProfile::new(TaskType::Chat, prompt).unwrap()
}

fn exhaust(ledger: &tierroute::ledger::CostLedger, account: &str) {
    ledger.record(UsageRecord {
        account_id: account.to_string(),
        request_id: "seed".to_string(),
        provider: "paid".to_string(),
        model: "paid-large".to_string(),
        tokens: 1_000_000,
        cost_usd: 10.0,
        recorded_at: Utc::now(),
    });
}

#[tokio::test]
async fn test_identical_request_is_served_from_cache() {
    let h = harness(Step::Reply("hello", 12), Step::Fatal, Step::Fatal);
    let profile = chat("hi there");

    let first = h.service.route(&profile, "default", "client-a").await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(first.model_used.provider, "local");
    assert!(first.model_used.is_self_hosted);
    assert_eq!(first.attempts.len(), 1);

    let second = h.service.route(&profile, "default", "client-b").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.result, first.result);
    assert_eq!(second.model_used.provider, first.model_used.provider);
    assert_eq!(second.model_used.model, first.model_used.model);
    assert_eq!(second.model_used.cost_usd, 0.0);
    assert!(second.attempts.is_empty());

    assert_eq!(h.local.calls(), 1, "cache hit must not dispatch");
}

#[tokio::test]
async fn test_semantic_change_misses_cache() {
    let h = harness(Step::Reply("hello", 12), Step::Fatal, Step::Fatal);
    let profile = chat("hi there");

    h.service.route(&profile, "default", "c").await.unwrap();
    let high = profile.clone().with_complexity(Complexity::High);
    let response = h.service.route(&high, "default", "c").await.unwrap();

    assert_eq!(response.cache_status, CacheStatus::Miss);
}

#[tokio::test]
async fn test_fatal_failure_falls_through_to_next_tier() {
    let h = harness(Step::Fatal, Step::Reply("ok", 20), Step::Fatal);

    let response = h.service.route(&chat("hello"), "default", "c").await.unwrap();

    assert_eq!(response.model_used.provider, "free-cloud");
    assert_eq!(response.model_used.model, "free-llama");
    assert_eq!(response.attempts.len(), 2);
    assert_eq!(response.attempts[0].provider, "local");
    assert_eq!(response.attempts[0].outcome, AttemptOutcome::FatalFailure);
    assert_eq!(response.attempts[1].outcome, AttemptOutcome::Success);
    assert_eq!(h.local.calls(), 1, "fatal failures are not retried");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_up_to_budget() {
    let h = harness(Step::Transient, Step::Reply("ok", 20), Step::Fatal);

    let response = h.service.route(&chat("hello"), "default", "c").await.unwrap();

    // retry_budget = 2 → 3 attempts on the local candidate
    assert_eq!(h.local.calls(), 3);
    let local: Vec<_> = response
        .attempts
        .iter()
        .filter(|a| a.provider == "local")
        .collect();
    assert_eq!(local.len(), 3);
    assert!(local.iter().all(|a| a.outcome == AttemptOutcome::TransientFailure));
    assert_eq!(
        local.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(response.model_used.provider, "free-cloud");
}

#[tokio::test(start_paused = true)]
async fn test_transient_then_success_stays_on_candidate() {
    let local = ScriptedInvoker::scripted("local", [Step::Transient], Step::Reply("ok", 5));
    let h = harness_with(
        fixture_config(),
        local,
        ScriptedInvoker::always("free-cloud", Step::Fatal),
        ScriptedInvoker::always("paid", Step::Fatal),
    );

    let response = h.service.route(&chat("hello"), "default", "c").await.unwrap();

    assert_eq!(response.model_used.provider, "local");
    assert_eq!(response.attempts.len(), 2);
    assert_eq!(h.free.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_and_is_retried() {
    let h = harness(Step::Hang, Step::Reply("ok", 5), Step::Fatal);

    let response = h.service.route(&chat("hello"), "default", "c").await.unwrap();

    let first = &response.attempts[0];
    assert_eq!(first.outcome, AttemptOutcome::TransientFailure);
    assert!(first.error.as_deref().unwrap().contains("timed out"));
    assert!(first.latency_ms >= 2_000);
    assert_eq!(h.local.calls(), 3);
    assert_eq!(response.model_used.provider, "free-cloud");
}

#[tokio::test]
async fn test_all_fatal_candidates_exhaust_to_fallback() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Fatal);

    let response = h.service.route(&chat("hello"), "default", "c").await.unwrap();

    assert!(response.is_fallback());
    assert_eq!(response.model_used.provider, "fallback");
    assert_eq!(response.model_used.model, "none");
    assert_eq!(response.model_used.cost_usd, 0.0);
    assert_eq!(response.attempts.len(), 3);
    assert!(
        response
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::FatalFailure)
    );

    let again = h.service.route(&chat("hello"), "default", "c").await.unwrap();
    assert_eq!(again.cache_status, CacheStatus::Miss, "fallbacks are not cached");
}

#[tokio::test]
async fn test_paid_success_records_actual_cost() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Reply("answer", 1_000));

    let response = h.service.route(&chat("hello"), "acme", "c").await.unwrap();

    // 700 tokens at 0.005/k + 300 tokens at 0.015/k
    let expected = 0.0035 + 0.0045;
    assert_eq!(response.model_used.provider, "paid");
    assert!((response.model_used.cost_usd - expected).abs() < 1e-12);

    let account = h.ledger.account("acme").unwrap();
    assert!((account.current_month_spend_usd() - expected).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_caller_dropping_route_after_paid_answer_still_pays() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Reply("answer", 100_000));
    let answered = h.paid.answered();
    let profile = chat("hello");

    let route = h.service.route(&profile, "acme", "c");
    tokio::pin!(route);
    let finished = tokio::select! {
        biased;
        _ = answered.notified() => false,
        result = &mut route => {
            assert_eq!(result.unwrap().model_used.provider, "paid");
            true
        }
    };
    drop(route);

    assert!(finished, "route should finish in the poll that received the answer");
    assert_eq!(h.paid.calls(), 1);
    // 70k tokens at 0.005/k + 30k tokens at 0.015/k
    let account = h.ledger.account("acme").unwrap();
    assert!(account.current_month_spend_usd() > 0.0);
    assert!((account.current_month_spend_usd() - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_free_success_leaves_ledger_untouched() {
    let h = harness(Step::Reply("hi", 500), Step::Fatal, Step::Fatal);

    h.service.route(&chat("hello"), "acme", "c").await.unwrap();

    assert!(h.ledger.account("acme").is_none());
}

#[tokio::test]
async fn test_placeholder_answers_are_served_but_not_cached() {
    let h = harness(Step::Placeholder, Step::Fatal, Step::Fatal);
    let profile = chat("draw me something");

    let first = h.service.route(&profile, "default", "c").await.unwrap();
    assert_eq!(first.result, "[placeholder output]");
    let second = h.service.route(&profile, "default", "c").await.unwrap();

    assert_eq!(second.cache_status, CacheStatus::Miss);
    assert_eq!(h.local.calls(), 2);
}

#[tokio::test]
async fn test_exhausted_account_refused_without_free_option() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Reply("ok", 10));
    exhaust(&h.ledger, "acme");

    let profile = RequestProfile::new(TaskType::Analysis, "analyze revenue").unwrap();
    let err = h.service.route(&profile, "acme", "c").await.unwrap_err();

    assert!(matches!(err, AppError::BudgetExceeded { ref account, .. } if account == "acme"));
    assert_eq!(h.paid.calls(), 0);
}

#[tokio::test]
async fn test_exhausted_account_still_gets_free_backends() {
    let h = harness(Step::Reply("free answer", 10), Step::Fatal, Step::Reply("paid", 10));
    exhaust(&h.ledger, "acme");

    let response = h.service.route(&chat("hello"), "acme", "c").await.unwrap();

    assert_eq!(response.model_used.provider, "local");
    assert_eq!(response.model_used.cost_usd, 0.0);
}

#[tokio::test]
async fn test_exhausted_account_skips_paid_candidate() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Reply("paid", 10));
    exhaust(&h.ledger, "acme");

    let response = h.service.route(&chat("hello"), "acme", "c").await.unwrap();

    assert!(response.is_fallback());
    assert_eq!(response.attempts.len(), 2, "paid candidate was filtered out");
    assert_eq!(h.paid.calls(), 0);
}

#[tokio::test]
async fn test_max_cost_below_every_candidate_is_refused() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Reply("ok", 10));
    let profile = RequestProfile::new(TaskType::Analysis, "analyze revenue for q3")
        .unwrap()
        .with_max_cost(0.000_000_1)
        .unwrap();

    let err = h.service.route(&profile, "default", "c").await.unwrap_err();

    assert!(matches!(err, AppError::NoAffordableCandidate { .. }));
}

#[tokio::test]
async fn test_rate_limit_applies_per_client_and_cache_bypasses_it() {
    let mut config = fixture_config();
    config.rate_limit.max_requests = 2;
    let h = harness_with(
        config,
        ScriptedInvoker::always("local", Step::Reply("hi", 5)),
        ScriptedInvoker::always("free-cloud", Step::Fatal),
        ScriptedInvoker::always("paid", Step::Fatal),
    );

    h.service.route(&chat("one"), "default", "busy").await.unwrap();
    h.service.route(&chat("two"), "default", "busy").await.unwrap();

    let err = h.service.route(&chat("three"), "default", "busy").await.unwrap_err();
    match err {
        AppError::RateLimited {
            client,
            retry_after_seconds,
        } => {
            assert_eq!(client, "busy");
            assert!((1..=60).contains(&retry_after_seconds));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    let cached = h.service.route(&chat("one"), "default", "busy").await.unwrap();
    assert_eq!(cached.cache_status, CacheStatus::Hit);

    h.service.route(&chat("three"), "default", "quiet").await.unwrap();

    let status = h.service.status();
    assert_eq!(status.rate_limited_identities, 1);
    assert_eq!(status.cache.entries, 3);
}

#[tokio::test]
async fn test_unservable_task_is_a_configuration_error() {
    let h = harness(Step::Fatal, Step::Fatal, Step::Fatal);
    let profile = RequestProfile::new(TaskType::Video, "a cat surfing").unwrap();

    let err = h.service.route(&profile, "default", "c").await.unwrap_err();

    assert!(matches!(err, AppError::Config(_)));
}
