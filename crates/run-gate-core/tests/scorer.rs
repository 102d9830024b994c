// crates/run-gate-core/tests/scorer.rs
// ============================================================================
// Module: Evidence Scorer Tests
// Description: Tier handling, freshness, and overall score aggregation.
// ============================================================================
//! ## Overview
//! Validates min-over-Tier-A aggregation, required-claim handling, staleness,
//! and fingerprint invalidation.

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
use run_gate_core::ClaimPolicy;
use run_gate_core::ClaimType;
use run_gate_core::ClaimVerdict;
use run_gate_core::EvidenceItem;
use run_gate_core::GatePolicy;
use run_gate_core::ScoringContext;
use run_gate_core::SubjectIdentity;
use run_gate_core::Tier;
use run_gate_core::WeakReason;
use run_gate_core::score_evidence;
use serde_json::json;

#[test]
fn overall_is_the_weakest_tier_a_claim() {
    let policy = policy().with_claim("stock", ClaimPolicy::new(Tier::A));
    let evidence = vec![
        price("p1", 0.9),
        item("s1", "stock", json!("in_stock"), 0.7),
        item("b1", "specs", json!("8GB"), 0.1),
    ];
    let score = score_evidence(&policy, &evidence, &ScoringContext::at(at(0)));
    assert_eq!(score.overall, 0.7);
    assert!(score.warnings().iter().any(|warning| warning.starts_with("specs: weak")));
}

#[test]
fn best_fresh_item_wins_within_a_claim() {
    let evidence = vec![price("p1", 0.4), price("p2", 0.8), price("p3", 0.6)];
    let score = score_evidence(&policy(), &evidence, &ScoringContext::at(at(0)));
    let claim = score.claim(&ClaimType::new("price")).unwrap();
    assert_eq!(claim.verdict, ClaimVerdict::Ok);
    assert_eq!(claim.best_evidence.as_ref().map(|id| id.as_str()), Some("p2"));
    assert_eq!(score.overall, 0.8);
}

#[test]
fn missing_required_tier_a_claim_scores_zero() {
    let evidence = vec![item("b1", "specs", json!("8GB"), 0.9)];
    let score = score_evidence(&policy(), &evidence, &ScoringContext::at(at(0)));
    let claim = score.claim(&ClaimType::new("price")).unwrap();
    assert_eq!(claim.verdict, ClaimVerdict::Missing);
    assert_eq!(score.overall, 0.0);
    assert_eq!(claim.describe(), "price: missing");
}

#[test]
fn optional_missing_tier_a_claim_is_ignored() {
    let policy = policy().with_claim("stock", ClaimPolicy::new(Tier::A).with_required(false));
    let score = score_evidence(&policy, &[price("p1", 0.75)], &ScoringContext::at(at(0)));
    assert_eq!(score.overall, 0.75);
}

#[test]
fn no_tier_a_claims_scores_one() {
    let policy = GatePolicy::new("b-only").with_claim("specs", ClaimPolicy::new(Tier::B));
    let evidence = vec![item("b1", "specs", json!("8GB"), 0.2)];
    let score = score_evidence(&policy, &evidence, &ScoringContext::at(at(0)));
    assert_eq!(score.overall, 1.0);
}

#[test]
fn unknown_claim_types_are_tier_c_and_never_gate() {
    let evidence = vec![price("p1", 0.9), item("x1", "mood", json!("sunny"), 0.0)];
    let score = score_evidence(&policy(), &evidence, &ScoringContext::at(at(0)));
    let claim = score.claim(&ClaimType::new("mood")).unwrap();
    assert_eq!(claim.tier, Tier::C);
    assert_eq!(score.overall, 0.9);
    assert!(score.refetch_candidates().is_empty());
}

#[test]
fn tier_assignment_decides_how_a_weak_claim_counts() {
    let evidence = vec![price("p1", 0.9), item("s1", "specs", json!("8GB"), 0.2)];
    let ctx = ScoringContext::at(at(0));
    let specs = ClaimType::new("specs");

    let as_a = score_evidence(
        &policy().with_claim("specs", ClaimPolicy::new(Tier::A)),
        &evidence,
        &ctx,
    );
    assert_eq!(as_a.overall, 0.2);

    let as_b = score_evidence(
        &policy().with_claim("specs", ClaimPolicy::new(Tier::B)),
        &evidence,
        &ctx,
    );
    assert_eq!(as_b.overall, 0.9);
    assert_eq!(as_b.warnings().len(), 1);
    assert_eq!(as_b.refetch_candidates(), vec![specs.clone()]);

    let as_c = score_evidence(
        &policy().with_claim("specs", ClaimPolicy::new(Tier::C)),
        &evidence,
        &ctx,
    );
    assert_eq!(as_c.overall, 0.9);
    assert!(as_c.warnings().is_empty());
    assert!(!as_c.refetch_candidates().contains(&specs));
}

#[test]
fn stale_evidence_is_weak() {
    let score =
        score_evidence(&policy(), &[price("p1", 0.95)], &ScoringContext::at(at(minutes(61))));
    let claim = score.claim(&ClaimType::new("price")).unwrap();
    assert_eq!(claim.verdict, ClaimVerdict::Weak);
    assert_eq!(claim.weak_reason, Some(WeakReason::Stale));
    assert_eq!(score.overall, 0.0);
    assert_eq!(score.refetch_candidates(), vec![ClaimType::new("price")]);
}

#[test]
fn fingerprint_change_invalidates_bound_evidence() {
    let old = SubjectIdentity::new("Acme", "Phone X").fingerprint().unwrap();
    let new = SubjectIdentity::new("Acme", "Phone X").with_variant("Pro").fingerprint().unwrap();
    let evidence: Vec<EvidenceItem> = vec![price("p1", 0.95).with_fingerprint(old.clone())];

    let context = ScoringContext::at(at(0)).with_fingerprint(&old);
    let same = score_evidence(&policy(), &evidence, &context);
    assert_eq!(same.overall, 0.95);

    let changed =
        score_evidence(&policy(), &evidence, &ScoringContext::at(at(0)).with_fingerprint(&new));
    let claim = changed.claim(&ClaimType::new("price")).unwrap();
    assert_eq!(claim.weak_reason, Some(WeakReason::FingerprintChanged));
    assert_eq!(changed.overall, 0.0);
}

#[test]
fn low_confidence_description_names_the_floor() {
    let score = score_evidence(&policy(), &[price("p1", 0.4)], &ScoringContext::at(at(0)));
    let claim = score.claim(&ClaimType::new("price")).unwrap();
    assert_eq!(claim.describe(), "price: weak (0.40 < 0.60)");
}
