// crates/run-gate-core/src/core/policy.rs
// ============================================================================
// Module: Run Gate Policy
// Description: Per-claim tiers, confidence floors, and freshness windows.
// Purpose: Express gate thresholds as data rather than scattered constants.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`GatePolicy`] describes how evidence is judged: the overall confidence
//! threshold, the trust tier at which disagreeing sources become a critical
//! conflict, whether one silent refetch is allowed per run, and a rule for
//! every known claim type. Claim types without a rule are treated as Tier C.
//!
//! Tiers carry no numeric weight. A Tier A claim feeds the minimum that forms
//! the overall score, a Tier B claim only warns, and a Tier C claim is never
//! evaluated for gating.
//!
//! ## Freshness
//! Each claim rule carries a TTL. Evidence older than the TTL, or observed
//! against a subject fingerprint that no longer matches, needs refresh and
//! scores zero until refetched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::evidence::MAX_TRUST_TIER;
use crate::core::evidence::Tier;
use crate::core::identifiers::ClaimType;
use crate::core::time::MILLIS_PER_MINUTE;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default overall confidence threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Default minimum trust tier at which disagreement is a critical conflict.
pub const DEFAULT_CONFLICT_MIN_TRUST_TIER: u8 = 4;

/// Default freshness window for claim types without an explicit TTL (24h).
pub const DEFAULT_FRESHNESS_MS: i64 = 24 * 60 * MILLIS_PER_MINUTE;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The policy is structurally invalid.
    #[error("invalid gate policy: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Claim Rules
// ============================================================================

/// Rule applied to one claim type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimPolicy {
    /// Criticality tier.
    pub tier: Tier,
    /// Confidence floor below which the claim is weak.
    pub min_confidence: f64,
    /// Freshness window in milliseconds.
    pub freshness_ms: i64,
    /// Whether a missing claim counts as zero confidence.
    pub required: bool,
}

impl ClaimPolicy {
    /// Creates a rule with the default floor and freshness window.
    #[must_use]
    pub const fn new(tier: Tier) -> Self {
        Self {
            tier,
            min_confidence: DEFAULT_THRESHOLD,
            freshness_ms: DEFAULT_FRESHNESS_MS,
            required: matches!(tier, Tier::A),
        }
    }

    /// Sets the confidence floor.
    #[must_use]
    pub const fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Sets the freshness window in minutes.
    #[must_use]
    pub const fn with_freshness_minutes(mut self, minutes: u32) -> Self {
        self.freshness_ms = (minutes as i64).saturating_mul(MILLIS_PER_MINUTE);
        self
    }

    /// Sets whether the claim is required.
    #[must_use]
    pub const fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

// ============================================================================
// SECTION: Gate Policy
// ============================================================================

/// Versioned gate policy.
///
/// # Invariants
/// - `threshold` and every `min_confidence` lie in `[0.0, 1.0]` after [`GatePolicy::validate`].
/// - Every `freshness_ms` is positive after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Policy version recorded in every run snapshot.
    pub version: String,
    /// Minimum overall score for a run to proceed.
    pub threshold: f64,
    /// Trust tier at which disagreeing sources form a critical conflict.
    pub conflict_min_trust_tier: u8,
    /// Whether a checkpoint may refetch weak evidence once per run.
    pub auto_refetch: bool,
    /// Rules by claim type.
    pub claims: BTreeMap<ClaimType, ClaimPolicy>,
}

impl GatePolicy {
    /// Creates an empty policy with default threshold and conflict tier.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            threshold: DEFAULT_THRESHOLD,
            conflict_min_trust_tier: DEFAULT_CONFLICT_MIN_TRUST_TIER,
            auto_refetch: true,
            claims: BTreeMap::new(),
        }
    }

    /// Sets the overall threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Enables or disables the silent refetch.
    #[must_use]
    pub fn with_auto_refetch(mut self, enabled: bool) -> Self {
        self.auto_refetch = enabled;
        self
    }

    /// Adds or replaces the rule for a claim type.
    #[must_use]
    pub fn with_claim(mut self, claim_type: impl Into<ClaimType>, rule: ClaimPolicy) -> Self {
        self.claims.insert(claim_type.into(), rule);
        self
    }

    /// Returns the rule for a claim type.
    #[must_use]
    pub fn claim_policy(&self, claim_type: &ClaimType) -> Option<&ClaimPolicy> {
        self.claims.get(claim_type)
    }

    /// Returns the tier of a claim type; unknown claim types are Tier C.
    #[must_use]
    pub fn tier_for(&self, claim_type: &ClaimType) -> Tier {
        self.claim_policy(claim_type).map_or(Tier::C, |rule| rule.tier)
    }

    /// Returns the freshness window for a claim type.
    #[must_use]
    pub fn freshness_ms(&self, claim_type: &ClaimType) -> i64 {
        self.claim_policy(claim_type).map_or(DEFAULT_FRESHNESS_MS, |rule| rule.freshness_ms)
    }

    /// Returns true when evidence for `claim_type` observed at `observed_at` must be refetched.
    ///
    /// A changed subject fingerprint invalidates evidence regardless of age.
    #[must_use]
    pub fn needs_refresh(
        &self,
        claim_type: &ClaimType,
        observed_at: Timestamp,
        now: Timestamp,
        fingerprint_changed: bool,
    ) -> bool {
        if fingerprint_changed {
            return true;
        }
        now.millis_since(observed_at) > self.freshness_ms(claim_type)
    }

    /// Validates numeric bounds and claim rules.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Invalid`] when a bound is violated.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError::Invalid("version must be non-empty".to_string()));
        }
        if !unit_interval(self.threshold) {
            return Err(PolicyError::Invalid("threshold must be within [0, 1]".to_string()));
        }
        if self.conflict_min_trust_tier == 0 || self.conflict_min_trust_tier > MAX_TRUST_TIER {
            return Err(PolicyError::Invalid(format!(
                "conflict_min_trust_tier must be within 1..={MAX_TRUST_TIER}"
            )));
        }
        for (claim_type, rule) in &self.claims {
            if claim_type.is_blank() {
                return Err(PolicyError::Invalid("claim type must be non-empty".to_string()));
            }
            if !unit_interval(rule.min_confidence) {
                return Err(PolicyError::Invalid(format!(
                    "claim {claim_type}: min_confidence must be within [0, 1]"
                )));
            }
            if rule.freshness_ms <= 0 {
                return Err(PolicyError::Invalid(format!(
                    "claim {claim_type}: freshness must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Returns true for finite values in `[0.0, 1.0]`.
fn unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
