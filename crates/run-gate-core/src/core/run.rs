// crates/run-gate-core/src/core/run.rs
// ============================================================================
// Module: Run Gate Run Records
// Description: Run status, lease fields, forensic snapshot, and the run row.
// Purpose: Provide the single shared mutable resource every worker coordinates on.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`RunRecord`] is the run row. All cross-worker coordination mutates it
//! through guarded conditional updates (see [`crate::core::guard`]). The lease
//! is a set of fields on the row rather than a separate table, and the
//! forensic snapshot records enough context to understand a run after the
//! fact.
//!
//! ## Lifecycle
//! `created -> started -> (waiting_approval -> approved | refetch) -> running -> done`,
//! with `paused` reachable from working states, `failed` from working states,
//! and `aborted` from every non-terminal state. Terminal states clear the lease.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::assessment::BreakerSummary;
use crate::core::identifiers::ActionId;
use crate::core::identifiers::ApprovalNonce;
use crate::core::identifiers::LockToken;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SubjectId;
use crate::core::identifiers::WorkerId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet started.
    Created,
    /// Started; automated work may proceed.
    Started,
    /// Paused by the worker; no work proceeds.
    Paused,
    /// A human asked for fresh evidence.
    Refetch,
    /// Gated; waiting for a human decision.
    WaitingApproval,
    /// Approved by a human.
    Approved,
    /// Running the expensive work.
    Running,
    /// Completed successfully.
    Done,
    /// Failed with an unrecoverable error.
    Failed,
    /// Terminated by an operator or human.
    Aborted,
}

impl RunStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Created,
        Self::Started,
        Self::Paused,
        Self::Refetch,
        Self::WaitingApproval,
        Self::Approved,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::Aborted,
    ];

    /// Returns the stable status label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Refetch => "refetch",
            Self::WaitingApproval => "waiting_approval",
            Self::Approved => "approved",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Parses a stable status label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }

    /// Returns true for `done`, `failed`, and `aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }

    /// Returns true when expensive work may proceed in this status.
    #[must_use]
    pub const fn allows_work(self) -> bool {
        matches!(self, Self::Started | Self::Approved | Self::Running)
    }

    /// Returns true when the transition `self -> next` is in the lifecycle table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Aborted) {
            return true;
        }
        match self {
            Self::Created => matches!(next, Self::Started),
            Self::Started => {
                matches!(next, Self::Paused | Self::WaitingApproval | Self::Running | Self::Failed)
            }
            Self::Paused => matches!(next, Self::Started | Self::Approved | Self::Running),
            Self::Refetch => matches!(next, Self::Started | Self::WaitingApproval),
            Self::WaitingApproval => matches!(next, Self::Approved | Self::Refetch),
            Self::Approved => matches!(
                next,
                Self::Running | Self::Paused | Self::WaitingApproval | Self::Failed
            ),
            Self::Running => {
                matches!(next, Self::Done | Self::Failed | Self::Paused | Self::WaitingApproval)
            }
            Self::Done | Self::Failed | Self::Aborted => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Lease
// ============================================================================

/// Lease fields on a run row.
///
/// # Invariants
/// - `lock_expires_at = renewal time + lease_ms`.
/// - A lease with `now >= lock_expires_at` is free for claim purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Worker holding the lease.
    pub worker_id: WorkerId,
    /// Token of this claim session.
    pub lock_token: LockToken,
    /// When the lease was claimed.
    pub locked_at: Timestamp,
    /// When the lease lapses unless renewed.
    pub lock_expires_at: Timestamp,
    /// Lease length applied on claim and on every renewal.
    pub lease_ms: i64,
}

impl Lease {
    /// Returns true when the lease has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.lock_expires_at
    }

    /// Returns true when `token` holds this unexpired lease at `now`.
    #[must_use]
    pub fn is_held_by(&self, token: &LockToken, now: Timestamp) -> bool {
        &self.lock_token == token && !self.is_expired(now)
    }
}

// ============================================================================
// SECTION: Forensic Snapshot
// ============================================================================

/// One status change recorded in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMarker {
    /// Status entered.
    pub status: RunStatus,
    /// When it was entered.
    pub at: Timestamp,
    /// Action that caused it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
}

/// Context captured on a run for after-the-fact inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicSnapshot {
    /// Current lifecycle phase.
    pub phase: RunStatus,
    /// Policy version in force when the run was created.
    pub policy_version: String,
    /// When the run was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Context supplied on start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_pack: Option<Value>,
    /// Most recent breaker evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_breaker: Option<BreakerSummary>,
    /// Status to resume into after a pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_status: Option<RunStatus>,
    /// Error code recorded on failure or abort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Phase history.
    #[serde(default)]
    pub markers: Vec<PhaseMarker>,
    /// When the snapshot last changed.
    pub updated_at: Timestamp,
}

impl ForensicSnapshot {
    /// Creates the snapshot written at run creation.
    #[must_use]
    pub fn initial(policy_version: impl Into<String>, now: Timestamp) -> Self {
        Self {
            phase: RunStatus::Created,
            policy_version: policy_version.into(),
            started_at: None,
            context_pack: None,
            last_breaker: None,
            resume_status: None,
            error_code: None,
            markers: vec![PhaseMarker { status: RunStatus::Created, at: now, action_id: None }],
            updated_at: now,
        }
    }
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// The run row.
///
/// # Invariants
/// - `revision` increments on every applied update.
/// - Terminal runs carry no lease and no approval nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Subject the run works on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Policy version in force.
    pub policy_version: String,
    /// Forensic snapshot.
    pub snapshot: ForensicSnapshot,
    /// Current lease, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Nonce of the open approval gate, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_nonce: Option<ApprovalNonce>,
    /// Whether the one silent refetch has been consumed.
    #[serde(default)]
    pub auto_refetch_used: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
    /// Monotonic revision counter.
    #[serde(default)]
    pub revision: u64,
}

impl RunRecord {
    /// Creates a new run in `created`.
    #[must_use]
    pub fn new(
        run_id: RunId,
        subject_id: Option<SubjectId>,
        policy_version: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let policy_version = policy_version.into();
        Self {
            run_id,
            subject_id,
            status: RunStatus::Created,
            snapshot: ForensicSnapshot::initial(policy_version.clone(), now),
            policy_version,
            lease: None,
            approval_nonce: None,
            auto_refetch_used: false,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Returns the lease when it is unexpired at `now`.
    #[must_use]
    pub fn active_lease(&self, now: Timestamp) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Returns true when `token` holds the unexpired lease at `now`.
    #[must_use]
    pub fn lease_held_by(&self, token: &LockToken, now: Timestamp) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.is_held_by(token, now))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
