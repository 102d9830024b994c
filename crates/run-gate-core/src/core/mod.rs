// crates/run-gate-core/src/core/mod.rs
// ============================================================================
// Module: Run Gate Core Types
// Description: Canonical run, evidence, policy, and event structures.
// Purpose: Provide stable, serializable types shared by every store and runtime.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Core types define the run row, its lease fields and forensic snapshot, the
//! evidence and policy model, the event log, and the conditional-update
//! vocabulary. They carry no behavior that depends on a store or a clock.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod assessment;
pub mod event;
pub mod evidence;
pub mod fingerprint;
pub mod guard;
pub mod hashing;
pub mod identifiers;
pub mod policy;
pub mod run;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use assessment::BreakerSummary;
pub use assessment::BreakerVerdict;
pub use assessment::ClaimSummary;
pub use assessment::ClaimVerdict;
pub use assessment::ConflictSummary;
pub use assessment::WeakReason;
pub use event::EventAppend;
pub use event::RunEvent;
pub use event::RunEventType;
pub use evidence::EvidenceItem;
pub use evidence::MAX_TRUST_TIER;
pub use evidence::Tier;
pub use evidence::values_agree;
pub use fingerprint::Fingerprint;
pub use fingerprint::SubjectIdentity;
pub use guard::ConditionalUpdate;
pub use guard::LeaseChange;
pub use guard::RunUpdate;
pub use guard::SnapshotChange;
pub use guard::UpdateGuard;
pub use guard::UpdateOutcome;
pub use guard::guards_match;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::ContentDigest;
pub use hashing::HashError;
pub use identifiers::ActionId;
pub use identifiers::ActorId;
pub use identifiers::ApprovalNonce;
pub use identifiers::ClaimType;
pub use identifiers::EvidenceId;
pub use identifiers::LockToken;
pub use identifiers::RunId;
pub use identifiers::SourceId;
pub use identifiers::SubjectId;
pub use identifiers::WorkerId;
pub use policy::ClaimPolicy;
pub use policy::GatePolicy;
pub use policy::PolicyError;
pub use run::ForensicSnapshot;
pub use run::Lease;
pub use run::PhaseMarker;
pub use run::RunRecord;
pub use run::RunStatus;
pub use time::MILLIS_PER_MINUTE;
pub use time::TimeError;
pub use time::Timestamp;
