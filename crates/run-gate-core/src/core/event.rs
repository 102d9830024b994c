// crates/run-gate-core/src/core/event.rs
// ============================================================================
// Module: Run Gate Event Log
// Description: Append-only, idempotent run event records.
// Purpose: Record every state change and decision exactly once per action id.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Run events form the audit trail of a run. The `(run_id, action_id)` pair
//! is unique: appending a second event with the same pair is a no-op that
//! reports [`EventAppend::Duplicate`]. Events for one run are totally ordered
//! by the store-assigned `seq`; no ordering holds across runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Kind of run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// Run created.
    Created,
    /// Run started.
    Started,
    /// Checkpoint evaluated and passed.
    CheckpointPassed,
    /// Checkpoint gated; waiting for approval.
    GateOpened,
    /// Human approved.
    Approved,
    /// Human requested fresh evidence.
    RefetchRequested,
    /// Refetched evidence passed; run resumed.
    RefetchResolved,
    /// Expensive work began.
    Running,
    /// Run paused.
    Paused,
    /// Run resumed.
    Resumed,
    /// Run completed.
    Completed,
    /// Run failed.
    Failed,
    /// Run aborted.
    Aborted,
    /// Lease claimed.
    LeaseClaimed,
    /// Lease released by its holder.
    LeaseReleased,
    /// Expired lease cleared by an operator.
    LeaseUnlocked,
    /// Worker lost its lease after repeated heartbeat failures.
    LockLost,
}

impl RunEventType {
    /// Returns the stable event type label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::CheckpointPassed => "checkpoint_passed",
            Self::GateOpened => "gate_opened",
            Self::Approved => "approved",
            Self::RefetchRequested => "refetch_requested",
            Self::RefetchResolved => "refetch_resolved",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::LeaseClaimed => "lease_claimed",
            Self::LeaseReleased => "lease_released",
            Self::LeaseUnlocked => "lease_unlocked",
            Self::LockLost => "lock_lost",
        }
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// One run event.
///
/// # Invariants
/// - `seq` is assigned by the store on insert; events built by callers carry `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Idempotency key.
    pub action_id: ActionId,
    /// Event kind.
    pub event_type: RunEventType,
    /// Structured payload.
    pub payload: Value,
    /// When the event was recorded.
    pub recorded_at: Timestamp,
    /// Per-run insertion order, starting at 1.
    #[serde(default)]
    pub seq: u64,
}

impl RunEvent {
    /// Builds an event with an empty payload.
    #[must_use]
    pub fn new(
        run_id: RunId,
        action_id: ActionId,
        event_type: RunEventType,
        recorded_at: Timestamp,
    ) -> Self {
        Self { run_id, action_id, event_type, payload: Value::Null, recorded_at, seq: 0 }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of appending an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAppend {
    /// Inserted with the assigned sequence number.
    Inserted(u64),
    /// An event with the same `(run_id, action_id)` already exists.
    Duplicate,
}
