// crates/run-gate-core/src/core/assessment.rs
// ============================================================================
// Module: Run Gate Assessment Records
// Description: Verdict vocabulary shared by the scorer, breaker, and snapshots.
// Purpose: Persist the outcome of the last gate evaluation on each run.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! These types are the serialized vocabulary of evidence assessment. The
//! runtime scorer and breaker produce them; run snapshots persist a
//! [`BreakerSummary`] so an operator can see why a run was gated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::evidence::Tier;
use crate::core::identifiers::ClaimType;
use crate::core::identifiers::SourceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Claim Verdicts
// ============================================================================

/// Verdict for one claim type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimVerdict {
    /// Fresh evidence at or above the confidence floor.
    Ok,
    /// Evidence exists but is low-confidence or needs refresh.
    Weak,
    /// No evidence for the claim.
    Missing,
}

impl ClaimVerdict {
    /// Returns the stable verdict label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Weak => "weak",
            Self::Missing => "missing",
        }
    }
}

/// Why a claim was judged weak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeakReason {
    /// Best fresh confidence is below the floor.
    LowConfidence,
    /// Every item is older than the freshness window.
    Stale,
    /// Every item was observed against a different subject fingerprint.
    FingerprintChanged,
}

impl WeakReason {
    /// Returns the stable reason label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::Stale => "stale",
            Self::FingerprintChanged => "fingerprint_changed",
        }
    }
}

// ============================================================================
// SECTION: Breaker Verdicts
// ============================================================================

/// Circuit breaker verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerVerdict {
    /// Evidence is sufficient; the run continues.
    Proceed,
    /// Evidence is weak; a human decides.
    Gate,
    /// High-trust sources disagree; a human decides and no refetch is attempted.
    Conflict,
}

impl BreakerVerdict {
    /// Returns true when the run must wait for a human decision.
    #[must_use]
    pub const fn gates(self) -> bool {
        !matches!(self, Self::Proceed)
    }

    /// Returns the stable verdict label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Gate => "gate",
            Self::Conflict => "conflict",
        }
    }
}

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Persisted per-claim assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSummary {
    /// Claim type.
    pub claim_type: ClaimType,
    /// Tier the claim was judged under.
    pub tier: Tier,
    /// Verdict.
    pub verdict: ClaimVerdict,
    /// Score contributed by the claim.
    pub score: f64,
    /// Weakness detail when the verdict is weak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_reason: Option<WeakReason>,
}

/// Persisted conflict detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    /// Claim type the sources disagree on.
    pub claim_type: ClaimType,
    /// Sources involved in the disagreement.
    pub sources: Vec<SourceId>,
}

/// Persisted outcome of the most recent breaker evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSummary {
    /// Verdict.
    pub verdict: BreakerVerdict,
    /// Weakest Tier A score.
    pub overall_score: f64,
    /// Human-readable reason when the verdict gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the silent refetch was consumed by this evaluation.
    pub refetched: bool,
    /// Per-claim assessments.
    pub claims: Vec<ClaimSummary>,
    /// Conflicts between high-trust sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictSummary>,
    /// Tier B warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// When the evaluation ran.
    pub evaluated_at: Timestamp,
}
