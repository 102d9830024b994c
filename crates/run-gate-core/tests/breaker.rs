// crates/run-gate-core/tests/breaker.rs
// ============================================================================
// Module: Circuit Breaker Tests
// Description: Conflict detection, the single silent refetch, and gate reasons.
// ============================================================================
//! ## Overview
//! Validates breaker ordering: conflicts gate first, sufficient scores
//! proceed, weak evidence is refetched at most once and otherwise gates.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::float_cmp,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use common::at;
use common::item;
use common::minutes;
use common::policy;
use common::price;
use common::sourced;
use proptest::prelude::*;
use run_gate_core::BreakerVerdict;
use run_gate_core::CircuitBreaker;
use run_gate_core::ClaimPolicy;
use run_gate_core::ClaimType;
use run_gate_core::EvidenceItem;
use run_gate_core::EvidenceRefetcher;
use run_gate_core::GatePolicy;
use run_gate_core::RefetchError;
use run_gate_core::ScoringContext;
use run_gate_core::Tier;
use serde_json::json;

/// Refetcher that counts calls and returns a fixed batch.
struct CountingRefetcher {
    calls: usize,
    requested: Vec<ClaimType>,
    batch: Result<Vec<EvidenceItem>, RefetchError>,
}

impl CountingRefetcher {
    fn returning(batch: Vec<EvidenceItem>) -> Self {
        Self { calls: 0, requested: Vec::new(), batch: Ok(batch) }
    }

    fn failing(message: &str) -> Self {
        Self { calls: 0, requested: Vec::new(), batch: Err(RefetchError::Failed(message.into())) }
    }
}

impl EvidenceRefetcher for CountingRefetcher {
    fn refetch(&mut self, claim_types: &[ClaimType]) -> Result<Vec<EvidenceItem>, RefetchError> {
        self.calls += 1;
        self.requested = claim_types.to_vec();
        self.batch.clone()
    }
}

#[test]
fn sufficient_evidence_proceeds_without_refetch() {
    let policy = policy();
    let mut refetcher = CountingRefetcher::returning(vec![]);
    let evaluation = CircuitBreaker::new(&policy).evaluate(
        &[price("p1", 0.8)],
        Some(&mut refetcher),
        &ScoringContext::at(at(0)),
    );
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Proceed);
    assert!(evaluation.report.reason.is_none());
    assert!(!evaluation.report.refetched);
    assert_eq!(refetcher.calls, 0);
}

#[test]
fn weak_evidence_is_refetched_once_and_superseded() {
    let policy = policy();
    let mut refetcher = CountingRefetcher::returning(vec![price("p2", 0.9)]);
    let evaluation = CircuitBreaker::new(&policy).evaluate(
        &[price("p1", 0.4)],
        Some(&mut refetcher),
        &ScoringContext::at(at(0)),
    );
    assert_eq!(refetcher.calls, 1);
    assert_eq!(refetcher.requested, vec![ClaimType::new("price")]);
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Proceed);
    assert!(evaluation.report.refetched);
    let ids: Vec<&str> = evaluation.evidence.iter().map(|item| item.evidence_id.as_str()).collect();
    assert_eq!(ids, vec!["p2"]);
}

#[test]
fn weak_refetch_gates_with_reason() {
    let policy = policy();
    let mut refetcher = CountingRefetcher::returning(vec![price("p2", 0.4)]);
    let evaluation = CircuitBreaker::new(&policy).evaluate(
        &[price("p1", 0.4)],
        Some(&mut refetcher),
        &ScoringContext::at(at(0)),
    );
    assert_eq!(refetcher.calls, 1);
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Gate);
    let reason = evaluation.report.reason.unwrap();
    assert!(reason.starts_with("score 0.40 below threshold 0.60"), "{reason}");
    assert!(reason.contains("price: weak (0.40 < 0.60)"));
    assert!(reason.ends_with("after refetch"));
}

#[test]
fn refetch_failure_gates_and_counts_as_used() {
    let policy = policy();
    let mut refetcher = CountingRefetcher::failing("upstream 503");
    let evaluation = CircuitBreaker::new(&policy).evaluate(
        &[price("p1", 0.2)],
        Some(&mut refetcher),
        &ScoringContext::at(at(0)),
    );
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Gate);
    assert!(evaluation.report.refetched);
    assert!(evaluation.report.refetch_error.is_some());
    assert!(evaluation.report.reason.unwrap().contains("refetch failed"));
}

#[test]
fn no_refetcher_gates_immediately() {
    let policy = policy();
    let evaluation = CircuitBreaker::new(&policy).evaluate::<CountingRefetcher>(
        &[price("p1", 0.4)],
        None,
        &ScoringContext::at(at(0)),
    );
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Gate);
    assert!(!evaluation.report.refetched);
}

#[test]
fn high_trust_disagreement_is_a_conflict_and_skips_refetch() {
    let policy = policy();
    let evidence = vec![
        sourced("p1", "price", json!(199.0), 0.95, 5, "maker"),
        sourced("p2", "price", json!(249.0), 0.95, 4, "retailer"),
    ];
    let mut refetcher = CountingRefetcher::returning(vec![]);
    let evaluation = CircuitBreaker::new(&policy).evaluate(
        &evidence,
        Some(&mut refetcher),
        &ScoringContext::at(at(0)),
    );
    assert_eq!(evaluation.report.verdict, BreakerVerdict::Conflict);
    assert_eq!(refetcher.calls, 0);
    let reason = evaluation.report.reason.unwrap();
    assert_eq!(reason, "conflict on price: sources disagree (maker, retailer)");
}

#[test]
fn one_source_with_two_values_is_not_a_conflict() {
    let policy = policy();
    let evidence = vec![
        sourced("p1", "price", json!(199.0), 0.95, 5, "maker"),
        sourced("p2", "price", json!(249.0), 0.95, 5, "maker"),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    assert!(report.conflicts.is_empty());
    assert_ne!(report.verdict, BreakerVerdict::Conflict);
}

#[test]
fn conflict_reason_names_each_source_once() {
    let policy = policy();
    let evidence = vec![
        sourced("p1", "price", json!(199.0), 0.95, 5, "maker"),
        sourced("p2", "price", json!(249.0), 0.95, 5, "maker"),
        sourced("p3", "price", json!(199.0), 0.95, 4, "retailer"),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    assert_eq!(report.verdict, BreakerVerdict::Conflict);
    assert_eq!(report.conflicts[0].values.len(), 3);
    assert_eq!(report.reason.clone().unwrap(), "conflict on price: sources disagree (maker, retailer)");
    assert_eq!(report.summary(at(0)).conflicts[0].sources.len(), 2);
}

#[test]
fn low_trust_disagreement_is_not_a_conflict() {
    let policy = policy();
    let evidence = vec![
        sourced("p1", "price", json!(199.0), 0.95, 5, "maker"),
        sourced("p2", "price", json!(249.0), 0.5, 2, "forum"),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    assert_eq!(report.verdict, BreakerVerdict::Proceed);
}

#[test]
fn equivalent_values_do_not_conflict() {
    let policy = policy();
    let evidence = vec![
        sourced("s1", "specs", json!(" 8GB "), 0.9, 5, "maker"),
        sourced("s2", "specs", json!("8gb"), 0.9, 5, "lab"),
        sourced("p1", "price", json!(199), 0.9, 5, "maker"),
        sourced("p2", "price", json!(199.0), 0.9, 5, "lab"),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    assert!(report.conflicts.is_empty());
    assert_eq!(report.verdict, BreakerVerdict::Proceed);
}

#[test]
fn tier_c_and_stale_items_never_conflict() {
    let policy = policy();
    let mut stale = sourced("p0", "price", json!(99.0), 0.9, 5, "archive");
    stale.observed_at = at(-minutes(120));
    let evidence = vec![
        sourced("t1", "tagline", json!("fast"), 0.9, 5, "maker"),
        sourced("t2", "tagline", json!("slow"), 0.9, 5, "lab"),
        stale,
        sourced("p1", "price", json!(199.0), 0.9, 5, "maker"),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    assert!(report.conflicts.is_empty());
    assert_eq!(report.verdict, BreakerVerdict::Proceed);
}

#[test]
fn summary_carries_claims_and_conflict_sources() {
    let policy = policy();
    let evidence = vec![
        sourced("s1", "specs", json!("8GB"), 0.9, 4, "maker"),
        sourced("s2", "specs", json!("16GB"), 0.9, 4, "lab"),
        price("p1", 0.9),
    ];
    let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
    let summary = report.summary(at(5));
    assert_eq!(summary.verdict, BreakerVerdict::Conflict);
    assert_eq!(summary.conflicts.len(), 1);
    assert_eq!(summary.conflicts[0].sources.len(), 2);
    assert_eq!(summary.evaluated_at, at(5));
    assert!(summary.claims.iter().any(|claim| claim.claim_type.as_str() == "price"));
}

#[test]
fn needs_refresh_follows_claim_freshness() {
    let policy = policy();
    let breaker = CircuitBreaker::new(&policy);
    let price = ClaimType::new("price");
    assert!(!breaker.needs_refresh(&price, at(0), at(minutes(60)), false));
    assert!(breaker.needs_refresh(&price, at(0), at(minutes(61)), false));
    assert!(breaker.needs_refresh(&price, at(0), at(0), true));
}

// ============================================================================
// SECTION: Properties
// ============================================================================

fn tier_a_policy(threshold: f64) -> GatePolicy {
    GatePolicy::new("prop")
        .with_threshold(threshold)
        .with_claim("a1", ClaimPolicy::new(Tier::A).with_min_confidence(threshold))
        .with_claim("a2", ClaimPolicy::new(Tier::A).with_min_confidence(threshold))
        .with_claim("b1", ClaimPolicy::new(Tier::B))
}

proptest! {
    #[test]
    fn overall_is_min_of_tier_a(a1 in 0.0_f64..=1.0, a2 in 0.0_f64..=1.0, b1 in 0.0_f64..=1.0) {
        let policy = tier_a_policy(0.6);
        let evidence = vec![
            item("e1", "a1", json!(1), a1),
            item("e2", "a2", json!(2), a2),
            item("e3", "b1", json!(3), b1),
        ];
        let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
        prop_assert_eq!(report.score.overall, a1.min(a2));
    }

    #[test]
    fn proceeds_when_every_tier_a_claim_clears(
        threshold in 0.0_f64..=1.0,
        lift in 0.0_f64..=1.0,
        b1 in 0.0_f64..=1.0,
    ) {
        let policy = tier_a_policy(threshold);
        let confidence = threshold + (1.0 - threshold) * lift;
        let evidence = vec![
            item("e1", "a1", json!(1), confidence),
            item("e2", "a2", json!(2), confidence),
            item("e3", "b1", json!(3), b1),
        ];
        let report = CircuitBreaker::new(&policy).assess(&evidence, &ScoringContext::at(at(0)));
        prop_assert_eq!(report.verdict, BreakerVerdict::Proceed);
    }

    #[test]
    fn high_trust_conflict_always_gates(
        confidence in 0.0_f64..=1.0,
        trust_a in 4_u8..=5,
        trust_b in 4_u8..=5,
        left in 0_i64..1_000,
        offset in 1_i64..1_000,
    ) {
        let policy = tier_a_policy(0.0);
        let evidence = vec![
            sourced("e1", "a1", json!(left), confidence, trust_a, "s1"),
            sourced("e2", "a1", json!(left + offset), confidence, trust_b, "s2"),
            item("e3", "a2", json!(2), 1.0),
        ];
        let mut calls = 0_usize;
        let mut refetch = |_: &[ClaimType]| -> Result<Vec<EvidenceItem>, RefetchError> {
            calls += 1;
            Ok(Vec::new())
        };
        let evaluation = CircuitBreaker::new(&policy).evaluate(
            &evidence,
            Some(&mut refetch),
            &ScoringContext::at(at(0)),
        );
        prop_assert_eq!(evaluation.report.verdict, BreakerVerdict::Conflict);
        prop_assert!(evaluation.report.should_gate());
        prop_assert_eq!(calls, 0);
    }
}
