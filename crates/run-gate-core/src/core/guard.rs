// crates/run-gate-core/src/core/guard.rs
// ============================================================================
// Module: Run Gate Conditional Updates
// Description: Guards, data-only update patches, and update outcomes.
// Purpose: Define the single concurrency-control discipline for run rows.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Every mutation of a run row is a [`ConditionalUpdate`]: a list of guards
//! on the prior row, a data-only [`RunUpdate`] patch, an optional event, and
//! evidence to link. Stores evaluate the whole thing atomically:
//!
//! 1. If the event's `(run_id, action_id)` already exists, report `Duplicate`.
//! 2. If any guard fails against the current row, report `Mismatch`.
//! 3. Otherwise apply the patch, insert the event, link the evidence, and
//!    report `Applied`. An evidence item that conflicts with a stored item of
//!    the same id fails the whole update.
//!
//! Guard matching and patch application live here so every store backend
//! shares the exact same semantics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::assessment::BreakerSummary;
use crate::core::event::RunEvent;
use crate::core::evidence::EvidenceItem;
use crate::core::identifiers::ActionId;
use crate::core::identifiers::ApprovalNonce;
use crate::core::identifiers::LockToken;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkerId;
use crate::core::run::Lease;
use crate::core::run::PhaseMarker;
use crate::core::run::RunRecord;
use crate::core::run::RunStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Guards
// ============================================================================

/// Predicate on the prior run row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGuard {
    /// Status equals the given value.
    StatusIs(RunStatus),
    /// Status is one of the given values.
    StatusIn(Vec<RunStatus>),
    /// Status is not terminal.
    NotTerminal,
    /// The token holds an unexpired lease at `now`.
    LeaseHeldBy {
        /// Presented token.
        token: LockToken,
        /// Evaluation time.
        now: Timestamp,
    },
    /// The lease is free at `now`, or is held by `worker_id` under `token`.
    LeaseClaimable {
        /// Claiming worker.
        worker_id: WorkerId,
        /// Token presented for a re-claim.
        token: Option<LockToken>,
        /// Evaluation time.
        now: Timestamp,
    },
    /// A lease exists and has expired at `now`.
    LeaseExpired {
        /// Evaluation time.
        now: Timestamp,
    },
    /// The open approval nonce equals the given value.
    NonceIs(ApprovalNonce),
}

impl UpdateGuard {
    /// Returns true when the guard holds for `record`.
    #[must_use]
    pub fn matches(&self, record: &RunRecord) -> bool {
        match self {
            Self::StatusIs(status) => record.status == *status,
            Self::StatusIn(statuses) => statuses.contains(&record.status),
            Self::NotTerminal => !record.status.is_terminal(),
            Self::LeaseHeldBy { token, now } => record.lease_held_by(token, *now),
            Self::LeaseClaimable { worker_id, token, now } => match &record.lease {
                None => true,
                Some(lease) if lease.is_expired(*now) => true,
                Some(lease) => {
                    &lease.worker_id == worker_id && token.as_ref() == Some(&lease.lock_token)
                }
            },
            Self::LeaseExpired { now } => {
                record.lease.as_ref().is_some_and(|lease| lease.is_expired(*now))
            }
            Self::NonceIs(nonce) => record.approval_nonce.as_ref() == Some(nonce),
        }
    }
}

/// Returns true when every guard holds for `record`.
#[must_use]
pub fn guards_match(guards: &[UpdateGuard], record: &RunRecord) -> bool {
    guards.iter().all(|guard| guard.matches(record))
}

// ============================================================================
// SECTION: Update Patches
// ============================================================================

/// Change to the lease fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseChange {
    /// Replace the lease.
    Set(Lease),
    /// Extend the current lease to `lock_expires_at`.
    Renew {
        /// New expiry.
        lock_expires_at: Timestamp,
    },
    /// Clear the lease.
    Clear,
}

/// Data-only change to the forensic snapshot, applied inside the store's atomic section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotChange {
    /// Record a start with the supplied context.
    pub started: Option<(Timestamp, Option<Value>)>,
    /// Replace the last breaker summary.
    pub last_breaker: Option<BreakerSummary>,
    /// Set or clear the resume status.
    pub resume_status: Option<Option<RunStatus>>,
    /// Set the error code.
    pub error_code: Option<String>,
    /// Append a phase marker for a checkpoint that did not change status.
    pub checkpoint_marker: bool,
}

/// Data-only patch applied to a run row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    /// New status.
    pub status: Option<RunStatus>,
    /// Snapshot change.
    pub snapshot: SnapshotChange,
    /// Lease change.
    pub lease: Option<LeaseChange>,
    /// Set or clear the approval nonce.
    pub approval_nonce: Option<Option<ApprovalNonce>>,
    /// Mark the silent refetch as consumed.
    pub consume_auto_refetch: bool,
    /// Action recorded in phase markers.
    pub action_id: Option<ActionId>,
    /// Update time.
    pub at: Timestamp,
}

impl RunUpdate {
    /// Creates an empty patch stamped at `at`.
    #[must_use]
    pub fn new(at: Timestamp) -> Self {
        Self {
            status: None,
            snapshot: SnapshotChange::default(),
            lease: None,
            approval_nonce: None,
            consume_auto_refetch: false,
            action_id: None,
            at,
        }
    }

    /// Sets the new status.
    #[must_use]
    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the lease change.
    #[must_use]
    pub fn lease(mut self, change: LeaseChange) -> Self {
        self.lease = Some(change);
        self
    }

    /// Sets or clears the approval nonce.
    #[must_use]
    pub fn nonce(mut self, nonce: Option<ApprovalNonce>) -> Self {
        self.approval_nonce = Some(nonce);
        self
    }

    /// Sets the snapshot change.
    #[must_use]
    pub fn snapshot(mut self, change: SnapshotChange) -> Self {
        self.snapshot = change;
        self
    }

    /// Marks the silent refetch as consumed when `consumed` is true.
    #[must_use]
    pub fn consume_auto_refetch(mut self, consumed: bool) -> Self {
        self.consume_auto_refetch = consumed;
        self
    }

    /// Records the action responsible for the patch.
    #[must_use]
    pub fn action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Applies the patch to `record` in place.
    ///
    /// Entering a terminal status clears the lease and the approval nonce.
    pub fn apply_to(&self, record: &mut RunRecord) {
        let snapshot = &mut record.snapshot;
        if let Some((started_at, context)) = &self.snapshot.started {
            snapshot.started_at = Some(*started_at);
            snapshot.context_pack.clone_from(context);
        }
        if let Some(summary) = &self.snapshot.last_breaker {
            snapshot.last_breaker = Some(summary.clone());
        }
        if let Some(resume) = self.snapshot.resume_status {
            snapshot.resume_status = resume;
        }
        if let Some(code) = &self.snapshot.error_code {
            snapshot.error_code = Some(code.clone());
        }
        if let Some(status) = self.status {
            record.status = status;
            snapshot.phase = status;
        }
        if self.status.is_some() || self.snapshot.checkpoint_marker {
            snapshot.markers.push(PhaseMarker {
                status: record.status,
                at: self.at,
                action_id: self.action_id.clone(),
            });
        }
        snapshot.updated_at = self.at;

        match &self.lease {
            Some(LeaseChange::Set(lease)) => record.lease = Some(lease.clone()),
            Some(LeaseChange::Renew { lock_expires_at }) => {
                if let Some(lease) = record.lease.as_mut() {
                    lease.lock_expires_at = *lock_expires_at;
                }
            }
            Some(LeaseChange::Clear) => record.lease = None,
            None => {}
        }
        if let Some(nonce) = &self.approval_nonce {
            record.approval_nonce.clone_from(nonce);
        }
        if self.consume_auto_refetch {
            record.auto_refetch_used = true;
        }
        if record.status.is_terminal() {
            record.lease = None;
            record.approval_nonce = None;
        }
        record.updated_at = self.at;
        record.revision = record.revision.saturating_add(1);
    }
}

// ============================================================================
// SECTION: Conditional Updates
// ============================================================================

/// Guarded update submitted to a run store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpdate {
    /// Target run.
    pub run_id: RunId,
    /// Guards on the prior row.
    pub guards: Vec<UpdateGuard>,
    /// Patch applied when every guard holds.
    pub update: RunUpdate,
    /// Event written in the same atomic section.
    pub event: Option<RunEvent>,
    /// Evidence linked to the run only when the update applies.
    pub evidence: Vec<EvidenceItem>,
}

impl ConditionalUpdate {
    /// Creates a conditional update without an event.
    #[must_use]
    pub const fn new(run_id: RunId, guards: Vec<UpdateGuard>, update: RunUpdate) -> Self {
        Self { run_id, guards, update, event: None, evidence: Vec::new() }
    }

    /// Attaches the event written with the update.
    #[must_use]
    pub fn with_event(mut self, event: RunEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Appends evidence linked to the run when the update applies.
    #[must_use]
    pub fn with_evidence(mut self, items: &[EvidenceItem]) -> Self {
        self.evidence.extend_from_slice(items);
        self
    }

    /// Returns the updated record when the guards hold for `current`.
    #[must_use]
    pub fn evaluate(&self, current: &RunRecord) -> Option<RunRecord> {
        if !guards_match(&self.guards, current) {
            return None;
        }
        let mut next = current.clone();
        self.update.apply_to(&mut next);
        Some(next)
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Applied; carries the updated record.
    Applied(RunRecord),
    /// A guard failed; carries the unchanged current record.
    Mismatch(RunRecord),
    /// The event's action id was already recorded; carries the current record.
    Duplicate(RunRecord),
    /// No run with the given identifier.
    NotFound,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
