// crates/run-gate-core/src/core/evidence.rs
// ============================================================================
// Module: Run Gate Evidence Model
// Description: Evidence items, criticality tiers, and value comparison.
// Purpose: Describe the claims a run gathers before committing to expensive work.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An evidence item is one observed claim: a value for a claim type, the
//! confidence of the producer, and the trust tier of its source. Claim types
//! carry a criticality tier through the gate policy:
//!
//! - Tier A claims gate; a weak or missing Tier A claim opens the gate.
//! - Tier B claims are evaluated and produce warnings only.
//! - Tier C claims are recorded for audit and never evaluated.
//!
//! Evidence items are immutable once recorded. A changed observation is a new
//! item with a new identifier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::fingerprint::Fingerprint;
use crate::core::identifiers::ClaimType;
use crate::core::identifiers::EvidenceId;
use crate::core::identifiers::SourceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Tiers
// ============================================================================

/// Criticality tier assigned to a claim type by the gate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Critical: weak or missing evidence gates the run.
    A,
    /// Important: weak evidence produces a warning.
    B,
    /// Informational: recorded, never evaluated.
    C,
}

impl Tier {
    /// Returns the stable tier label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
        }
    }

    /// Returns true when weak evidence for this tier gates the run.
    #[must_use]
    pub const fn gates(self) -> bool {
        matches!(self, Self::A)
    }

    /// Returns true when evidence for this tier is scored at all.
    #[must_use]
    pub const fn is_evaluated(self) -> bool {
        !matches!(self, Self::C)
    }
}

// ============================================================================
// SECTION: Evidence Items
// ============================================================================

/// Highest trust tier a source can carry.
pub const MAX_TRUST_TIER: u8 = 5;

/// One observed claim.
///
/// # Invariants
/// - `confidence` is expected in `[0.0, 1.0]`; see [`EvidenceItem::effective_confidence`].
/// - `trust_tier` is expected in `1..=MAX_TRUST_TIER`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Evidence item identifier.
    pub evidence_id: EvidenceId,
    /// Claim type this item speaks to.
    pub claim_type: ClaimType,
    /// Observed value.
    pub value: Value,
    /// Producer confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Trust tier of the producing source.
    pub trust_tier: u8,
    /// When the value was observed.
    pub observed_at: Timestamp,
    /// Producing source identifier.
    pub source_id: SourceId,
    /// Subject fingerprint the value was observed against, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl EvidenceItem {
    /// Builds an evidence item without a subject fingerprint.
    #[must_use]
    pub fn new(
        evidence_id: impl Into<EvidenceId>,
        claim_type: impl Into<ClaimType>,
        value: Value,
        confidence: f64,
        trust_tier: u8,
        source_id: impl Into<SourceId>,
        observed_at: Timestamp,
    ) -> Self {
        Self {
            evidence_id: evidence_id.into(),
            claim_type: claim_type.into(),
            value,
            confidence,
            trust_tier,
            observed_at,
            source_id: source_id.into(),
            fingerprint: None,
        }
    }

    /// Attaches the subject fingerprint the value was observed against.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Returns confidence clamped to `[0.0, 1.0]`; non-finite values count as zero.
    #[must_use]
    pub fn effective_confidence(&self) -> f64 {
        if self.confidence.is_finite() { self.confidence.clamp(0.0, 1.0) } else { 0.0 }
    }

    /// Returns a validation message when the item is malformed.
    #[must_use]
    pub fn validation_error(&self) -> Option<String> {
        if self.evidence_id.is_blank() {
            return Some("evidence_id must be non-empty".to_string());
        }
        if self.claim_type.is_blank() {
            return Some(format!("evidence {} has an empty claim_type", self.evidence_id));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Some(format!("evidence {} confidence must be within [0, 1]", self.evidence_id));
        }
        if self.trust_tier == 0 || self.trust_tier > MAX_TRUST_TIER {
            return Some(format!(
                "evidence {} trust_tier must be within 1..={MAX_TRUST_TIER}",
                self.evidence_id
            ));
        }
        None
    }
}

// ============================================================================
// SECTION: Value Comparison
// ============================================================================

/// Returns true when two observed values denote the same claim value.
///
/// Numbers compare numerically so `5` and `5.0` agree; strings compare after
/// trimming and case folding; everything else compares structurally.
#[must_use]
pub fn values_agree(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
            _ => a == b,
        },
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => left == right,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
