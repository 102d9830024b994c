// crates/run-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Run Gate Interfaces
// Description: Backend-agnostic interfaces for stores, refetchers, notifiers, and tokens.
// Purpose: Define the contracts the runtime uses to reach external collaborators.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces isolate the runtime from persistence, evidence gathering, the
//! approval channel, and token generation. Implementations must be
//! deterministic where the runtime relies on that, and must fail closed on
//! invalid data.
//!
//! ## Run stores
//! A [`RunStore`] evaluates [`ConditionalUpdate`] atomically: the duplicate
//! event check, the guard check, the row write, and the event insert commit
//! together or not at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::ActionId;
use crate::core::ApprovalNonce;
use crate::core::ClaimType;
use crate::core::ConditionalUpdate;
use crate::core::EventAppend;
use crate::core::EvidenceItem;
use crate::core::Fingerprint;
use crate::core::LockToken;
use crate::core::RunEvent;
use crate::core::RunId;
use crate::core::RunRecord;
use crate::core::SubjectId;
use crate::core::Timestamp;
use crate::core::UpdateOutcome;

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Run store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("run store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("run store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("run store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("run store invalid data: {0}")]
    Invalid(String),
    /// A record with the same identity already exists.
    #[error("run store conflict: {0}")]
    Conflict(String),
    /// The data is retained and may not be removed.
    #[error("run store retention: {0}")]
    Retained(String),
    /// Store reported an error.
    #[error("run store error: {0}")]
    Store(String),
}

/// Persistence for run rows, run events, evidence, and subject fingerprints.
pub trait RunStore {
    /// Inserts a new run row together with its creation event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the run already exists.
    fn insert_run(&self, record: &RunRecord, event: &RunEvent) -> Result<(), StoreError>;

    /// Loads a run row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Finds the run whose lease carries `token`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_run_by_token(&self, token: &LockToken) -> Result<Option<RunId>, StoreError>;

    /// Applies a guarded update atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails; guard failures are
    /// reported as [`UpdateOutcome::Mismatch`], not as errors.
    fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError>;

    /// Appends a standalone event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the run is unknown or the insert fails.
    fn append_event(&self, event: &RunEvent) -> Result<EventAppend, StoreError>;

    /// Returns the event recorded under `(run_id, action_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_event(
        &self,
        run_id: &RunId,
        action_id: &ActionId,
    ) -> Result<Option<RunEvent>, StoreError>;

    /// Lists events for a run in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn list_events(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError>;

    /// Records evidence items and links them to a run.
    ///
    /// Re-recording an identical item is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when an item id is reused with different content.
    fn record_evidence(&self, run_id: &RunId, items: &[EvidenceItem]) -> Result<(), StoreError>;

    /// Lists evidence linked to a run, ordered by evidence id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn run_evidence(&self, run_id: &RunId) -> Result<Vec<EvidenceItem>, StoreError>;

    /// Removes the run's evidence links and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Retained`] when the run is `done`.
    fn unlink_evidence(&self, run_id: &RunId) -> Result<usize, StoreError>;

    /// Loads the last known fingerprint of a subject.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_fingerprint(&self, subject_id: &SubjectId) -> Result<Option<Fingerprint>, StoreError>;

    /// Stores the current fingerprint of a subject.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save_fingerprint(
        &self,
        subject_id: &SubjectId,
        fingerprint: &Fingerprint,
        observed_at: Timestamp,
    ) -> Result<(), StoreError>;
}

/// Forwards every store call through a shared pointer.
macro_rules! forward_run_store {
    ($($pointer:ty),*) => {$(
        impl<T: RunStore + ?Sized> RunStore for $pointer {
            fn insert_run(&self, record: &RunRecord, event: &RunEvent) -> Result<(), StoreError> {
                (**self).insert_run(record, event)
            }

            fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
                (**self).load_run(run_id)
            }

            fn find_run_by_token(&self, token: &LockToken) -> Result<Option<RunId>, StoreError> {
                (**self).find_run_by_token(token)
            }

            fn conditional_update(
                &self,
                update: &ConditionalUpdate,
            ) -> Result<UpdateOutcome, StoreError> {
                (**self).conditional_update(update)
            }

            fn append_event(&self, event: &RunEvent) -> Result<EventAppend, StoreError> {
                (**self).append_event(event)
            }

            fn find_event(
                &self,
                run_id: &RunId,
                action_id: &ActionId,
            ) -> Result<Option<RunEvent>, StoreError> {
                (**self).find_event(run_id, action_id)
            }

            fn list_events(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError> {
                (**self).list_events(run_id)
            }

            fn record_evidence(
                &self,
                run_id: &RunId,
                items: &[EvidenceItem],
            ) -> Result<(), StoreError> {
                (**self).record_evidence(run_id, items)
            }

            fn run_evidence(&self, run_id: &RunId) -> Result<Vec<EvidenceItem>, StoreError> {
                (**self).run_evidence(run_id)
            }

            fn unlink_evidence(&self, run_id: &RunId) -> Result<usize, StoreError> {
                (**self).unlink_evidence(run_id)
            }

            fn load_fingerprint(
                &self,
                subject_id: &SubjectId,
            ) -> Result<Option<Fingerprint>, StoreError> {
                (**self).load_fingerprint(subject_id)
            }

            fn save_fingerprint(
                &self,
                subject_id: &SubjectId,
                fingerprint: &Fingerprint,
                observed_at: Timestamp,
            ) -> Result<(), StoreError> {
                (**self).save_fingerprint(subject_id, fingerprint, observed_at)
            }
        }
    )*};
}

forward_run_store!(&T, Arc<T>);

// ============================================================================
// SECTION: Evidence Refetch
// ============================================================================

/// Evidence refetch errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefetchError {
    /// The evidence source is unavailable.
    #[error("evidence refetch failed: {0}")]
    Failed(String),
}

/// Fetches fresh evidence for weak claim types.
pub trait EvidenceRefetcher {
    /// Returns fresh evidence for the given claim types.
    ///
    /// # Errors
    ///
    /// Returns [`RefetchError`] when the source cannot be reached.
    fn refetch(&mut self, claim_types: &[ClaimType]) -> Result<Vec<EvidenceItem>, RefetchError>;
}

impl<F> EvidenceRefetcher for F
where
    F: FnMut(&[ClaimType]) -> Result<Vec<EvidenceItem>, RefetchError>,
{
    fn refetch(&mut self, claim_types: &[ClaimType]) -> Result<Vec<EvidenceItem>, RefetchError> {
        self(claim_types)
    }
}

// ============================================================================
// SECTION: Approval Notifications
// ============================================================================

/// Notification sent when a gate opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Gated run.
    pub run_id: RunId,
    /// Nonce binding decisions to this gate opening.
    pub nonce: ApprovalNonce,
    /// Human-readable gate reason.
    pub reason: String,
}

/// Approval notification errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The approval channel rejected or failed the delivery.
    #[error("approval notification failed: {0}")]
    Delivery(String),
}

/// Delivers approval requests to the external approval channel.
pub trait ApprovalNotifier {
    /// Sends one approval request.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError>;
}

impl<F> ApprovalNotifier for F
where
    F: Fn(&ApprovalRequest) -> Result<(), NotifyError>,
{
    fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        self(request)
    }
}

// ============================================================================
// SECTION: Token Source
// ============================================================================

/// Generates lock tokens and approval nonces.
///
/// # Invariants
/// - Generated values are unique for the lifetime of the store.
pub trait TokenSource {
    /// Returns a fresh lock token.
    fn lock_token(&self) -> LockToken;

    /// Returns a fresh approval nonce.
    fn approval_nonce(&self) -> ApprovalNonce;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn lock_token(&self) -> LockToken {
        (**self).lock_token()
    }

    fn approval_nonce(&self) -> ApprovalNonce {
        (**self).approval_nonce()
    }
}
