// crates/run-gate-core/src/runtime/scorer.rs
// ============================================================================
// Module: Run Gate Evidence Scorer
// Description: Per-claim and overall confidence scoring under a gate policy.
// Purpose: Turn raw evidence into a deterministic, explainable score.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Scoring groups evidence by claim type and keeps the best fresh item per
//! claim. Items that need refresh (stale, or observed against another subject
//! fingerprint) score zero. The overall score is the weakest Tier A claim;
//! a required Tier A claim with no evidence counts as zero, and with no
//! Tier A claims at all the overall score is `1.0`.
//!
//! Scoring is pure: the same policy, evidence, and context always produce
//! the same [`EvidenceScore`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::core::ClaimSummary;
use crate::core::ClaimType;
use crate::core::ClaimVerdict;
use crate::core::EvidenceId;
use crate::core::EvidenceItem;
use crate::core::Fingerprint;
use crate::core::GatePolicy;
use crate::core::Tier;
use crate::core::Timestamp;
use crate::core::WeakReason;

// ============================================================================
// SECTION: Context
// ============================================================================

/// Evaluation context supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    /// Evaluation time.
    pub now: Timestamp,
    /// Current subject fingerprint, when tracked.
    pub subject_fingerprint: Option<&'a Fingerprint>,
}

impl<'a> ScoringContext<'a> {
    /// Creates a context without a subject fingerprint.
    #[must_use]
    pub const fn at(now: Timestamp) -> Self {
        Self { now, subject_fingerprint: None }
    }

    /// Attaches the current subject fingerprint.
    #[must_use]
    pub const fn with_fingerprint(mut self, fingerprint: &'a Fingerprint) -> Self {
        self.subject_fingerprint = Some(fingerprint);
        self
    }

    /// Returns true when `item` was observed against a different fingerprint.
    pub(crate) fn fingerprint_changed(&self, item: &EvidenceItem) -> bool {
        match (self.subject_fingerprint, item.fingerprint.as_ref()) {
            (Some(current), Some(observed)) => current != observed,
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Scores
// ============================================================================

/// Assessment of one claim type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimScore {
    /// Claim type.
    pub claim_type: ClaimType,
    /// Tier the claim was judged under.
    pub tier: Tier,
    /// Verdict.
    pub verdict: ClaimVerdict,
    /// Best fresh confidence, or zero.
    pub score: f64,
    /// Confidence floor applied.
    pub min_confidence: f64,
    /// Whether the policy requires the claim.
    pub required: bool,
    /// Evidence item that produced the score.
    pub best_evidence: Option<EvidenceId>,
    /// Weakness detail.
    pub weak_reason: Option<WeakReason>,
}

impl ClaimScore {
    /// Returns true when the claim contributes to the overall score.
    #[must_use]
    pub const fn counts_toward_overall(&self) -> bool {
        self.tier.gates() && !(matches!(self.verdict, ClaimVerdict::Missing) && !self.required)
    }

    /// Returns true when the claim is not `ok`.
    #[must_use]
    pub const fn is_deficient(&self) -> bool {
        !matches!(self.verdict, ClaimVerdict::Ok)
    }

    /// Returns a short description such as `price: weak (0.40 < 0.60)`.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.verdict, self.weak_reason) {
            (ClaimVerdict::Ok, _) => format!("{}: ok ({:.2})", self.claim_type, self.score),
            (ClaimVerdict::Missing, _) => format!("{}: missing", self.claim_type),
            (ClaimVerdict::Weak, Some(WeakReason::LowConfidence) | None) => format!(
                "{}: weak ({:.2} < {:.2})",
                self.claim_type, self.score, self.min_confidence
            ),
            (ClaimVerdict::Weak, Some(reason)) => {
                format!("{}: weak ({})", self.claim_type, reason.as_str())
            }
        }
    }

    /// Converts to the persisted summary form.
    #[must_use]
    pub fn summary(&self) -> ClaimSummary {
        ClaimSummary {
            claim_type: self.claim_type.clone(),
            tier: self.tier,
            verdict: self.verdict,
            score: self.score,
            weak_reason: self.weak_reason,
        }
    }
}

/// Result of scoring a set of evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceScore {
    /// Per-claim assessments ordered by claim type.
    pub claims: Vec<ClaimScore>,
    /// Weakest counted Tier A score.
    pub overall: f64,
}

impl EvidenceScore {
    /// Returns the assessment for one claim type.
    #[must_use]
    pub fn claim(&self, claim_type: &ClaimType) -> Option<&ClaimScore> {
        self.claims.iter().find(|claim| &claim.claim_type == claim_type)
    }

    /// Returns deficient Tier A claims that count toward the overall score.
    pub fn deficient_critical(&self) -> impl Iterator<Item = &ClaimScore> {
        self.claims.iter().filter(|claim| claim.counts_toward_overall() && claim.is_deficient())
    }

    /// Returns claim types worth refetching: deficient Tier A and Tier B claims.
    #[must_use]
    pub fn refetch_candidates(&self) -> Vec<ClaimType> {
        self.claims
            .iter()
            .filter(|claim| claim.tier.is_evaluated() && claim.is_deficient())
            .filter(|claim| claim.tier.gates() || matches!(claim.verdict, ClaimVerdict::Weak))
            .map(|claim| claim.claim_type.clone())
            .collect()
    }

    /// Returns warnings for deficient Tier B claims.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.claims
            .iter()
            .filter(|claim| claim.tier == Tier::B && claim.is_deficient())
            .map(ClaimScore::describe)
            .collect()
    }
}

// ============================================================================
// SECTION: Scoring
// ============================================================================

/// Scores evidence under `policy`.
#[must_use]
pub fn score_evidence(
    policy: &GatePolicy,
    evidence: &[EvidenceItem],
    ctx: &ScoringContext<'_>,
) -> EvidenceScore {
    let mut grouped: BTreeMap<&ClaimType, Vec<&EvidenceItem>> = BTreeMap::new();
    for item in evidence {
        grouped.entry(&item.claim_type).or_default().push(item);
    }
    let claim_types: BTreeSet<&ClaimType> =
        policy.claims.keys().chain(grouped.keys().copied()).collect();

    let claims: Vec<ClaimScore> = claim_types
        .into_iter()
        .map(|claim_type| {
            let items = grouped.get(claim_type).map_or(&[][..], Vec::as_slice);
            score_claim(policy, claim_type, items, ctx)
        })
        .collect();

    let overall = claims
        .iter()
        .filter(|claim| claim.counts_toward_overall())
        .map(|claim| claim.score)
        .fold(None, |acc: Option<f64>, score| Some(acc.map_or(score, |min| min.min(score))))
        .unwrap_or(1.0);

    EvidenceScore { claims, overall }
}

/// Scores a single claim type.
fn score_claim(
    policy: &GatePolicy,
    claim_type: &ClaimType,
    items: &[&EvidenceItem],
    ctx: &ScoringContext<'_>,
) -> ClaimScore {
    let rule = policy.claim_policy(claim_type);
    let tier = rule.map_or(Tier::C, |rule| rule.tier);
    let min_confidence = rule.map_or(policy.threshold, |rule| rule.min_confidence);
    let required = rule.is_some_and(|rule| rule.required);
    let mut score = ClaimScore {
        claim_type: claim_type.clone(),
        tier,
        verdict: ClaimVerdict::Missing,
        score: 0.0,
        min_confidence,
        required,
        best_evidence: None,
        weak_reason: None,
    };
    if items.is_empty() {
        return score;
    }

    let fresh = items.iter().copied().filter(|item| {
        !policy.needs_refresh(claim_type, item.observed_at, ctx.now, ctx.fingerprint_changed(item))
    });
    let best = fresh.max_by(|a, b| {
        a.effective_confidence()
            .total_cmp(&b.effective_confidence())
            .then(a.trust_tier.cmp(&b.trust_tier))
            .then(a.observed_at.cmp(&b.observed_at))
            .then_with(|| b.evidence_id.cmp(&a.evidence_id))
    });

    match best {
        Some(item) => {
            score.score = item.effective_confidence();
            score.best_evidence = Some(item.evidence_id.clone());
            if score.score >= min_confidence {
                score.verdict = ClaimVerdict::Ok;
            } else {
                score.verdict = ClaimVerdict::Weak;
                score.weak_reason = Some(WeakReason::LowConfidence);
            }
        }
        None => {
            score.verdict = ClaimVerdict::Weak;
            let any_rebound = items.iter().any(|item| ctx.fingerprint_changed(item));
            score.weak_reason =
                Some(if any_rebound { WeakReason::FingerprintChanged } else { WeakReason::Stale });
        }
    }
    score
}
