// crates/run-gate-core/src/runtime/fingerprint.rs
// ============================================================================
// Module: Run Gate Fingerprint Tracker
// Description: Persisted subject fingerprints and change detection.
// Purpose: Invalidate evidence when the identity of a subject changes.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! The tracker computes the fingerprint of an observed identity, compares it
//! with the stored one, and stores the new value. A change is reported once;
//! the caller passes the current fingerprint into the scoring context so
//! evidence bound to the previous fingerprint needs refresh.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use tracing::info;

use crate::core::Fingerprint;
use crate::core::HashError;
use crate::core::SubjectId;
use crate::core::SubjectIdentity;
use crate::core::Timestamp;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of observing a subject identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintChange {
    /// No fingerprint was stored before.
    New,
    /// The fingerprint matches the stored one.
    Unchanged,
    /// The fingerprint differs from the stored one.
    Changed {
        /// Fingerprint stored before this observation.
        previous: Fingerprint,
    },
}

impl FingerprintChange {
    /// Returns true when the identity changed.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Fingerprint observation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintObservation {
    /// Current fingerprint.
    pub fingerprint: Fingerprint,
    /// Change relative to the stored fingerprint.
    pub change: FingerprintChange,
}

/// Fingerprint tracker errors.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Tracker
// ============================================================================

/// Tracks subject fingerprints in a run store.
#[derive(Debug, Clone)]
pub struct FingerprintTracker<S> {
    /// Backing store.
    store: S,
}

impl<S: RunStore> FingerprintTracker<S> {
    /// Creates a tracker over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Observes `identity` for `subject_id`, storing the resulting fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] when hashing or the store fails.
    pub fn observe(
        &self,
        subject_id: &SubjectId,
        identity: &SubjectIdentity,
        now: Timestamp,
    ) -> Result<FingerprintObservation, FingerprintError> {
        let fingerprint = identity.fingerprint()?;
        let change = match self.store.load_fingerprint(subject_id)? {
            None => FingerprintChange::New,
            Some(previous) if previous == fingerprint => FingerprintChange::Unchanged,
            Some(previous) => FingerprintChange::Changed { previous },
        };
        if !matches!(change, FingerprintChange::Unchanged) {
            self.store.save_fingerprint(subject_id, &fingerprint, now)?;
        }
        if let FingerprintChange::Changed { previous } = &change {
            info!(
                subject_id = %subject_id,
                previous = %previous,
                current = %fingerprint,
                "subject fingerprint changed"
            );
        }
        Ok(FingerprintObservation { fingerprint, change })
    }

    /// Returns the stored fingerprint for `subject_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    pub fn current(&self, subject_id: &SubjectId) -> Result<Option<Fingerprint>, StoreError> {
        self.store.load_fingerprint(subject_id)
    }
}
