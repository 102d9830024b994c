// crates/run-gate-core/src/core/hashing.rs
// ============================================================================
// Module: Run Gate Content Digests
// Description: Canonical JSON encoding and SHA-256 content digests.
// Purpose: Give subject fingerprints and stored run rows one stable digest form.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Values are encoded as RFC 8785 canonical JSON before hashing, so two
//! workers that build the same subject identity or run row in different
//! processes agree on its [`ContentDigest`]. The SQLite store keeps the
//! digest next to each row and refuses to load a row whose bytes no longer
//! match it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Algorithms
// ============================================================================

/// Digest algorithm recorded with every stored digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the label written to storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a label written by [`HashAlgorithm::as_str`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        (label == "sha256").then_some(Self::Sha256)
    }
}

/// Algorithm used for fingerprints and run rows.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Digests
// ============================================================================

/// Hex digest of some canonical content, tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    /// Algorithm that produced `hex`.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub hex: String,
}

impl ContentDigest {
    /// Returns true when `bytes` hash to this digest.
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        digest_bytes(self.algorithm, bytes).hex == self.hex
    }
}

/// Canonical encoding failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The value could not be written as canonical JSON.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// Encodes `value` as RFC 8785 canonical JSON.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Digests the canonical JSON form of `value`.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn digest_canonical<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<ContentDigest, HashError> {
    Ok(digest_bytes(algorithm, &canonical_bytes(value)?))
}

/// Digests raw bytes.
#[must_use]
pub fn digest_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> ContentDigest {
    let raw = match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(bytes),
    };
    ContentDigest { algorithm, hex: to_hex(&raw) }
}

/// Lowercase hex of `bytes`; also used for lease tokens and nonces.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::DEFAULT_HASH_ALGORITHM;
    use super::HashAlgorithm;
    use super::digest_bytes;
    use super::digest_canonical;
    use super::to_hex;

    #[test]
    fn key_order_does_not_change_the_digest() {
        let a = serde_json::json!({"run_id": "run-1", "status": "started"});
        let b = serde_json::json!({"status": "started", "run_id": "run-1"});
        assert_eq!(
            digest_canonical(DEFAULT_HASH_ALGORITHM, &a),
            digest_canonical(DEFAULT_HASH_ALGORITHM, &b)
        );
    }

    #[test]
    fn digest_detects_changed_bytes() {
        let digest = digest_bytes(HashAlgorithm::Sha256, b"run row");
        assert_eq!(digest.hex.len(), 64);
        assert!(digest.matches(b"run row"));
        assert!(!digest.matches(b"run rows"));
    }

    #[test]
    fn labels_and_hex_are_stable() {
        assert_eq!(HashAlgorithm::from_label("sha256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_label("md5"), None);
        assert_eq!(to_hex(&[0x00, 0x0f, 0xa5]), "000fa5");
    }
}
