// crates/run-gate-core/src/runtime/breaker.rs
// ============================================================================
// Module: Run Gate Circuit Breaker
// Description: Proceed/gate/conflict decisions with at most one silent refetch.
// Purpose: Decide whether a run may spend money on its next expensive step.
// Dependencies: crate::{core, interfaces, runtime::scorer}, tracing
// ============================================================================

//! ## Overview
//! The breaker evaluates evidence in a fixed order:
//!
//! 1. Conflict detection. Fresh Tier A or Tier B items from sources at or
//!    above the policy's conflict trust tier form a critical conflict when two
//!    different sources disagree on a value. A conflict always gates and is never refetched.
//! 2. Scoring. When the weakest Tier A score reaches the threshold, proceed.
//! 3. Silent refetch. When a refetcher is supplied, it is invoked once for
//!    the weak claim types. Returned items supersede prior items for the same
//!    claim types and the combined set is evaluated again, without a second
//!    refetch.
//!
//! A refetch failure gates the run; the refetch still counts as used.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::core::BreakerSummary;
use crate::core::BreakerVerdict;
use crate::core::ClaimType;
use crate::core::ConflictSummary;
use crate::core::EvidenceItem;
use crate::core::GatePolicy;
use crate::core::SourceId;
use crate::core::Timestamp;
use crate::core::values_agree;
use crate::interfaces::EvidenceRefetcher;
use crate::runtime::scorer::EvidenceScore;
use crate::runtime::scorer::ScoringContext;
use crate::runtime::scorer::score_evidence;

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Observed value from one source inside a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingValue {
    /// Source that reported the value.
    pub source_id: SourceId,
    /// Source trust tier.
    pub trust_tier: u8,
    /// Reported value.
    pub value: Value,
}

/// Disagreement between high-trust sources on one claim type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimConflict {
    /// Claim type.
    pub claim_type: ClaimType,
    /// Reported values; a source appears once per distinct value it gave.
    pub values: Vec<ConflictingValue>,
}

impl ClaimConflict {
    /// Returns the disagreeing sources in first-seen order, without repeats.
    #[must_use]
    pub fn sources(&self) -> Vec<&SourceId> {
        let mut sources: Vec<&SourceId> = Vec::new();
        for value in &self.values {
            if !sources.contains(&&value.source_id) {
                sources.push(&value.source_id);
            }
        }
        sources
    }
}

/// Outcome of one breaker evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerReport {
    /// Verdict.
    pub verdict: BreakerVerdict,
    /// Gate reason; `None` when proceeding.
    pub reason: Option<String>,
    /// Scores of the final evidence set.
    pub score: EvidenceScore,
    /// High-trust conflicts.
    pub conflicts: Vec<ClaimConflict>,
    /// Whether the silent refetch was invoked.
    pub refetched: bool,
    /// Refetch failure, when the refetcher errored.
    pub refetch_error: Option<String>,
}

impl BreakerReport {
    /// Returns true when the run must wait for a human decision.
    #[must_use]
    pub const fn should_gate(&self) -> bool {
        self.verdict.gates()
    }

    /// Converts to the persisted snapshot form.
    #[must_use]
    pub fn summary(&self, evaluated_at: Timestamp) -> BreakerSummary {
        BreakerSummary {
            verdict: self.verdict,
            overall_score: self.score.overall,
            reason: self.reason.clone(),
            refetched: self.refetched,
            claims: self.score.claims.iter().map(|claim| claim.summary()).collect(),
            conflicts: self
                .conflicts
                .iter()
                .map(|conflict| ConflictSummary {
                    claim_type: conflict.claim_type.clone(),
                    sources: conflict.sources().into_iter().cloned().collect(),
                })
                .collect(),
            warnings: self.score.warnings(),
            evaluated_at,
        }
    }
}

/// Breaker report plus the evidence set it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerEvaluation {
    /// Report.
    pub report: BreakerReport,
    /// Final evidence set, including refetched items.
    pub evidence: Vec<EvidenceItem>,
}

// ============================================================================
// SECTION: Circuit Breaker
// ============================================================================

/// Circuit breaker bound to a gate policy.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker<'p> {
    /// Policy in force.
    policy: &'p GatePolicy,
}

impl<'p> CircuitBreaker<'p> {
    /// Creates a breaker for `policy`.
    #[must_use]
    pub const fn new(policy: &'p GatePolicy) -> Self {
        Self { policy }
    }

    /// Returns true when evidence for `claim_type` must be refetched before use.
    #[must_use]
    pub fn needs_refresh(
        &self,
        claim_type: &ClaimType,
        observed_at: Timestamp,
        now: Timestamp,
        fingerprint_changed: bool,
    ) -> bool {
        self.policy.needs_refresh(claim_type, observed_at, now, fingerprint_changed)
    }

    /// Evaluates evidence without refetching.
    #[must_use]
    pub fn assess(&self, evidence: &[EvidenceItem], ctx: &ScoringContext<'_>) -> BreakerReport {
        let conflicts = self.detect_conflicts(evidence, ctx);
        let score = score_evidence(self.policy, evidence, ctx);
        let verdict = if !conflicts.is_empty() {
            BreakerVerdict::Conflict
        } else if score.overall >= self.policy.threshold {
            BreakerVerdict::Proceed
        } else {
            BreakerVerdict::Gate
        };
        let mut report = BreakerReport {
            verdict,
            reason: None,
            score,
            conflicts,
            refetched: false,
            refetch_error: None,
        };
        report.reason = gate_reason(&report, self.policy.threshold);
        report
    }

    /// Evaluates evidence, invoking `refetcher` at most once when evidence is weak.
    pub fn evaluate<R>(
        &self,
        evidence: &[EvidenceItem],
        refetcher: Option<&mut R>,
        ctx: &ScoringContext<'_>,
    ) -> BreakerEvaluation
    where
        R: EvidenceRefetcher + ?Sized,
    {
        let first = self.assess(evidence, ctx);
        let refetcher = match (first.verdict, refetcher) {
            (BreakerVerdict::Gate, Some(refetcher)) => refetcher,
            _ => {
                debug!(
                    verdict = first.verdict.as_str(),
                    score = first.score.overall,
                    "breaker evaluated"
                );
                return BreakerEvaluation { report: first, evidence: evidence.to_vec() };
            }
        };

        let weak = first.score.refetch_candidates();
        debug!(claims = weak.len(), "breaker refetching weak evidence");
        match refetcher.refetch(&weak) {
            Ok(fresh) => {
                let merged = supersede(evidence, fresh);
                let mut report = self.assess(&merged, ctx);
                report.refetched = true;
                report.reason = gate_reason(&report, self.policy.threshold);
                debug!(
                    verdict = report.verdict.as_str(),
                    score = report.score.overall,
                    "breaker re-evaluated"
                );
                BreakerEvaluation { report, evidence: merged }
            }
            Err(err) => {
                warn!(error = %err, "breaker refetch failed");
                let mut report = first;
                report.refetched = true;
                report.refetch_error = Some(err.to_string());
                report.reason = gate_reason(&report, self.policy.threshold);
                BreakerEvaluation { report, evidence: evidence.to_vec() }
            }
        }
    }

    /// Finds fresh Tier A and Tier B claims on which two high-trust sources disagree.
    ///
    /// One source reporting two values is not a conflict on its own.
    fn detect_conflicts(
        &self,
        evidence: &[EvidenceItem],
        ctx: &ScoringContext<'_>,
    ) -> Vec<ClaimConflict> {
        let mut grouped: BTreeMap<&ClaimType, Vec<&EvidenceItem>> = BTreeMap::new();
        for item in evidence {
            if item.trust_tier < self.policy.conflict_min_trust_tier {
                continue;
            }
            if !self.policy.tier_for(&item.claim_type).is_evaluated() {
                continue;
            }
            let changed = ctx.fingerprint_changed(item);
            if self.needs_refresh(&item.claim_type, item.observed_at, ctx.now, changed) {
                continue;
            }
            grouped.entry(&item.claim_type).or_default().push(item);
        }

        grouped
            .into_iter()
            .filter_map(|(claim_type, items)| {
                let disputed = items.iter().enumerate().any(|(index, left)| {
                    items.iter().skip(index + 1).any(|right| {
                        left.source_id != right.source_id
                            && !values_agree(&left.value, &right.value)
                    })
                });
                if !disputed {
                    return None;
                }
                let mut reported: Vec<&EvidenceItem> = Vec::new();
                for item in items {
                    let repeated = reported.iter().any(|seen| {
                        seen.source_id == item.source_id && values_agree(&seen.value, &item.value)
                    });
                    if !repeated {
                        reported.push(item);
                    }
                }
                Some(ClaimConflict {
                    claim_type: claim_type.clone(),
                    values: reported
                        .into_iter()
                        .map(|item| ConflictingValue {
                            source_id: item.source_id.clone(),
                            trust_tier: item.trust_tier,
                            value: item.value.clone(),
                        })
                        .collect(),
                })
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Replaces prior items for every claim type present in `fresh`.
fn supersede(prior: &[EvidenceItem], fresh: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
    let mut merged: Vec<EvidenceItem> = {
        let refreshed: BTreeSet<&ClaimType> = fresh.iter().map(|item| &item.claim_type).collect();
        prior.iter().filter(|item| !refreshed.contains(&item.claim_type)).cloned().collect()
    };
    merged.extend(fresh);
    merged
}

/// Builds the human-readable gate reason for a gating report.
fn gate_reason(report: &BreakerReport, threshold: f64) -> Option<String> {
    if !report.should_gate() {
        return None;
    }
    let mut parts: Vec<String> = report
        .conflicts
        .iter()
        .map(|conflict| {
            let sources: Vec<&str> =
                conflict.sources().into_iter().map(SourceId::as_str).collect();
            format!(
                "conflict on {}: sources disagree ({})",
                conflict.claim_type,
                sources.join(", ")
            )
        })
        .collect();
    if report.conflicts.is_empty() {
        parts.push(format!("score {:.2} below threshold {threshold:.2}", report.score.overall));
        parts.extend(report.score.deficient_critical().map(|claim| claim.describe()));
    }
    if let Some(error) = &report.refetch_error {
        parts.push(format!("refetch failed: {error}"));
    } else if report.refetched {
        parts.push("after refetch".to_string());
    }
    Some(parts.join("; "))
}
