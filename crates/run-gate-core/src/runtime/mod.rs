// crates/run-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Run Gate Runtime
// Description: Scoring, breaker, leases, state machine, and approval handling.
// Purpose: Coordinate runs across independent workers through a run store.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the evidence scorer, the circuit breaker, the
//! fingerprint tracker, the lease manager and worker session, the run state
//! machine, and the approval gate. Every cross-worker effect goes through
//! [`crate::interfaces::RunStore::conditional_update`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod approval;
pub mod breaker;
pub mod fingerprint;
pub mod lease;
pub mod machine;
pub mod scorer;
pub mod session;
pub mod store;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use approval::ApprovalAction;
pub use approval::ApprovalGate;
pub use approval::ApprovalOutcome;
pub use approval::ApprovalPolicy;
pub use approval::ApprovalSignal;
pub use approval::CallbackData;
pub use approval::CallbackError;
pub use approval::DEFAULT_MAX_CALLBACK_BYTES;
pub use breaker::BreakerEvaluation;
pub use breaker::BreakerReport;
pub use breaker::CircuitBreaker;
pub use breaker::ClaimConflict;
pub use breaker::ConflictingValue;
pub use fingerprint::FingerprintChange;
pub use fingerprint::FingerprintError;
pub use fingerprint::FingerprintObservation;
pub use fingerprint::FingerprintTracker;
pub use lease::ClaimOutcome;
pub use lease::DenyReason;
pub use lease::ForceReleaseOutcome;
pub use lease::LeaseBounds;
pub use lease::LeaseError;
pub use lease::LeaseGrant;
pub use lease::LeaseManager;
pub use lease::LeaseStatus;
pub use lease::MAX_LEASE_MINUTES;
pub use lease::MIN_LEASE_MINUTES;
pub use lease::ReleaseOutcome;
pub use machine::CheckpointOutcome;
pub use machine::CheckpointRequest;
pub use machine::GateDecision;
pub use machine::MachineError;
pub use machine::RunMachine;
pub use machine::StatusCheck;
pub use machine::TransitionOutcome;
pub use scorer::ClaimScore;
pub use scorer::EvidenceScore;
pub use scorer::ScoringContext;
pub use scorer::score_evidence;
pub use session::HeartbeatStatus;
pub use session::MAX_HEARTBEAT_FAILURES;
pub use session::SessionStart;
pub use session::WorkerSession;
pub use store::InMemoryRunStore;
pub use tokens::RandomTokenSource;
pub use tokens::SequentialTokenSource;
