// crates/run-gate-core/src/lib.rs
// ============================================================================
// Module: Run Gate Core Library
// Description: Public API surface for the Run Gate core.
// Purpose: Expose core types, interfaces, and runtime coordination.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Run Gate core coordinates long-running, multi-stage runs. It scores held
//! evidence, decides through a circuit breaker whether a run may spend on its
//! next expensive step, keeps at most one worker on a run through store-backed
//! leases, and resumes gated runs from idempotent human decisions. The core is
//! clock-free and backend-agnostic: callers pass timestamps and plug in a
//! [`RunStore`], an [`ApprovalNotifier`], and a [`TokenSource`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ApprovalNotifier;
pub use interfaces::ApprovalRequest;
pub use interfaces::EvidenceRefetcher;
pub use interfaces::NotifyError;
pub use interfaces::RefetchError;
pub use interfaces::RunStore;
pub use interfaces::StoreError;
pub use interfaces::TokenSource;
pub use runtime::ApprovalAction;
pub use runtime::ApprovalGate;
pub use runtime::ApprovalOutcome;
pub use runtime::ApprovalPolicy;
pub use runtime::ApprovalSignal;
pub use runtime::BreakerEvaluation;
pub use runtime::BreakerReport;
pub use runtime::CallbackData;
pub use runtime::CallbackError;
pub use runtime::CheckpointOutcome;
pub use runtime::CheckpointRequest;
pub use runtime::CircuitBreaker;
pub use runtime::ClaimConflict;
pub use runtime::ClaimOutcome;
pub use runtime::ClaimScore;
pub use runtime::DenyReason;
pub use runtime::EvidenceScore;
pub use runtime::FingerprintChange;
pub use runtime::FingerprintTracker;
pub use runtime::ForceReleaseOutcome;
pub use runtime::GateDecision;
pub use runtime::HeartbeatStatus;
pub use runtime::InMemoryRunStore;
pub use runtime::LeaseBounds;
pub use runtime::LeaseError;
pub use runtime::LeaseGrant;
pub use runtime::LeaseManager;
pub use runtime::MAX_HEARTBEAT_FAILURES;
pub use runtime::MAX_LEASE_MINUTES;
pub use runtime::MIN_LEASE_MINUTES;
pub use runtime::MachineError;
pub use runtime::RandomTokenSource;
pub use runtime::ReleaseOutcome;
pub use runtime::RunMachine;
pub use runtime::ScoringContext;
pub use runtime::SequentialTokenSource;
pub use runtime::SessionStart;
pub use runtime::StatusCheck;
pub use runtime::TransitionOutcome;
pub use runtime::WorkerSession;
pub use runtime::score_evidence;
