// crates/run-gate-core/src/core/fingerprint.rs
// ============================================================================
// Module: Run Gate Subject Fingerprints
// Description: Normalized subject identity and its canonical digest.
// Purpose: Detect when the subject of a run has changed identity.
// Dependencies: serde, crate::core::hashing
// ============================================================================

//! ## Overview
//! A subject fingerprint is the SHA-256 digest of the canonical JSON form of a
//! normalized identity (brand, model, variant). Normalization trims,
//! lowercases, and collapses internal whitespace so cosmetic edits do not
//! register as identity changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::ContentDigest;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashError;
use crate::core::hashing::digest_canonical;

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Identity-defining attributes of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectIdentity {
    /// Brand or manufacturer.
    pub brand: String,
    /// Model name or number.
    pub model: String,
    /// Optional variant (size, color, revision).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl SubjectIdentity {
    /// Creates an identity without a variant.
    #[must_use]
    pub fn new(brand: impl Into<String>, model: impl Into<String>) -> Self {
        Self { brand: brand.into(), model: model.into(), variant: None }
    }

    /// Attaches a variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Returns the normalized identity; an empty variant normalizes to `None`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let variant =
            self.variant.as_deref().map(normalize_field).filter(|value| !value.is_empty());
        Self { brand: normalize_field(&self.brand), model: normalize_field(&self.model), variant }
    }

    /// Computes the fingerprint of the normalized identity.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn fingerprint(&self) -> Result<Fingerprint, HashError> {
        digest_canonical(DEFAULT_HASH_ALGORITHM, &self.normalized()).map(Fingerprint)
    }
}

/// Trims, lowercases, and collapses runs of whitespace to one space.
fn normalize_field(value: &str) -> String {
    value.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

// ============================================================================
// SECTION: Fingerprint
// ============================================================================

/// Digest of a normalized subject identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(ContentDigest);

impl Fingerprint {
    /// Wraps an existing digest.
    #[must_use]
    pub const fn from_digest(digest: ContentDigest) -> Self {
        Self(digest)
    }

    /// Returns the underlying digest.
    #[must_use]
    pub const fn digest(&self) -> &ContentDigest {
        &self.0
    }

    /// Returns the lowercase hex digest value.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0.hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.algorithm.as_str(), self.0.hex)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
