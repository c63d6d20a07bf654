//! Property tests for candidate ranking

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tierroute::catalog::{CandidateBackend, Catalog};
use tierroute::config::BudgetConfig;
use tierroute::ledger::CostLedger;
use tierroute::router::{Complexity, RequestProfile, SelectionEngine, TaskType};
use tierroute::router::selection::HIGH_COMPLEXITY_QUALITY_FLOOR;

fn backend_strategy(index: usize) -> impl Strategy<Value = CandidateBackend> {
    let capability = prop::sample::select(vec![TaskType::Chat, TaskType::General, TaskType::Code]);
    (0u8..3, 0.0f64..=10.0, any::<bool>(), capability).prop_map(
        move |(tier, quality, priced, capability)| {
            let backend = CandidateBackend::new(
                format!("p{}", index % 3),
                format!("m{index}"),
                [capability],
                tier,
                quality,
                100_000,
            );
            if priced {
                backend.with_pricing(0.001, 0.002)
            } else {
                backend
            }
        },
    )
}

fn catalog_strategy() -> impl Strategy<Value = Vec<CandidateBackend>> {
    (1usize..12).prop_flat_map(|n| (0..n).map(backend_strategy).collect::<Vec<_>>())
}

fn engine(backends: Vec<CandidateBackend>) -> SelectionEngine {
    let catalog = Arc::new(Catalog::new(backends, BTreeMap::new()));
    let ledger = Arc::new(CostLedger::new(BudgetConfig::default()));
    SelectionEngine::new(catalog, ledger)
}

proptest! {
    #[test]
    fn ranked_tiers_never_decrease(backends in catalog_strategy()) {
        let profile = RequestProfile::new(TaskType::Chat, "hello there").unwrap();
        if let Ok(ranked) = engine(backends).rank(&profile, "acct") {
            prop_assert!(ranked.windows(2).all(|w| w[0].tier() <= w[1].tier()));
        }
    }

    #[test]
    fn quality_descends_within_a_tier(backends in catalog_strategy()) {
        let profile = RequestProfile::new(TaskType::Chat, "hello there").unwrap();
        if let Ok(ranked) = engine(backends).rank(&profile, "acct") {
            for pair in ranked.windows(2) {
                if pair[0].tier() == pair[1].tier() {
                    prop_assert!(pair[0].quality_score() >= pair[1].quality_score());
                }
            }
        }
    }

    #[test]
    fn high_complexity_respects_quality_floor(backends in catalog_strategy()) {
        let profile = RequestProfile::new(TaskType::Chat, "hello there")
            .unwrap()
            .with_complexity(Complexity::High);
        if let Ok(ranked) = engine(backends).rank(&profile, "acct") {
            prop_assert!(ranked.iter().all(|b| b.quality_score() >= HIGH_COMPLEXITY_QUALITY_FLOOR));
        }
    }

    #[test]
    fn every_ranked_candidate_serves_the_task(backends in catalog_strategy()) {
        let profile = RequestProfile::new(TaskType::Code, "fn main() {}").unwrap();
        if let Ok(ranked) = engine(backends).rank(&profile, "acct") {
            prop_assert!(!ranked.is_empty());
            prop_assert!(ranked.iter().all(|b| b.serves(TaskType::Code, profile.kind())));
        }
    }
}
