// crates/run-gate-core/src/runtime/machine.rs
// ============================================================================
// Module: Run Gate State Machine
// Description: Guarded run transitions, checkpoints, and the work gate.
// Purpose: Drive runs through their lifecycle with auditable, replay-safe steps.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`RunMachine`] owns the run lifecycle. Every transition:
//!
//! 1. loads the run and returns early when the action id is already recorded,
//! 2. checks the lifecycle table and, for worker operations, the lease,
//! 3. submits one conditional update carrying the new status, the snapshot
//!    change, and the event, guarded on the status it read.
//!
//! A transition either fully commits or is reported as not applied; retrying
//! with the same action id is always safe.
//!
//! [`RunMachine::evaluate_and_gate`] is the checkpoint every expensive step
//! runs through. A proceed verdict records `checkpoint_passed` without
//! changing status. A gate verdict moves the run to `waiting_approval`,
//! stamps a fresh nonce, and notifies the approval channel exactly once,
//! after the gate is committed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::core::ActionId;
use crate::core::ActorId;
use crate::core::ApprovalNonce;
use crate::core::ConditionalUpdate;
use crate::core::EvidenceItem;
use crate::core::Fingerprint;
use crate::core::GatePolicy;
use crate::core::LockToken;
use crate::core::RunEvent;
use crate::core::RunEventType;
use crate::core::RunId;
use crate::core::RunRecord;
use crate::core::RunStatus;
use crate::core::RunUpdate;
use crate::core::SnapshotChange;
use crate::core::SubjectId;
use crate::core::Timestamp;
use crate::core::UpdateGuard;
use crate::core::UpdateOutcome;
use crate::interfaces::ApprovalNotifier;
use crate::interfaces::ApprovalRequest;
use crate::interfaces::EvidenceRefetcher;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;
use crate::interfaces::TokenSource;
use crate::runtime::breaker::BreakerEvaluation;
use crate::runtime::breaker::BreakerReport;
use crate::runtime::breaker::CircuitBreaker;
use crate::runtime::scorer::ScoringContext;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// State machine errors.
#[derive(Debug, Error)]
pub enum MachineError {
    /// No such run.
    #[error("run not found: {0}")]
    RunNotFound(RunId),
    /// A run with this id already exists.
    #[error("run already exists: {0}")]
    RunExists(RunId),
    /// The presented token does not hold the run's lease.
    #[error("lease not held for run {0}")]
    LeaseNotHeld(RunId),
    /// Caller-supplied evidence is malformed.
    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Result of [`RunMachine::check_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    /// Work may proceed.
    Proceed(RunStatus),
    /// Work must not proceed.
    Refuse(RunStatus),
}

impl StatusCheck {
    /// Returns true when work may proceed.
    #[must_use]
    pub const fn is_proceed(self) -> bool {
        matches!(self, Self::Proceed(_))
    }
}

/// Result of a plain transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Committed; carries the updated record.
    Applied(RunRecord),
    /// The action id was already recorded; nothing changed.
    AlreadyApplied(RunRecord),
    /// The run was not in a status that permits the transition.
    NotApplied {
        /// Status observed.
        current: RunStatus,
    },
}

impl TransitionOutcome {
    /// Returns true when this call committed the transition.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome {
    /// Evidence sufficed; the run continues in place.
    Proceed {
        /// Updated record.
        record: RunRecord,
        /// Breaker report.
        report: BreakerReport,
    },
    /// The run now waits for a human decision.
    Gated {
        /// Updated record.
        record: RunRecord,
        /// Breaker report.
        report: BreakerReport,
        /// Nonce stamped on the gate.
        nonce: ApprovalNonce,
        /// Whether the approval channel accepted the notification.
        notified: bool,
    },
    /// The checkpoint action id was already recorded; nothing was evaluated.
    AlreadyRecorded(RunRecord),
    /// The run was not in a status that permits a checkpoint.
    NotApplied {
        /// Status observed.
        current: RunStatus,
    },
}

/// Human decision on an open gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue the run.
    Approve,
    /// Gather fresh evidence and evaluate again.
    Refetch,
    /// Terminate the run.
    Abort,
}

impl GateDecision {
    /// Returns the status the decision moves the run to.
    #[must_use]
    pub const fn target(self) -> RunStatus {
        match self {
            Self::Approve => RunStatus::Approved,
            Self::Refetch => RunStatus::Refetch,
            Self::Abort => RunStatus::Aborted,
        }
    }

    /// Returns the stable decision label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Refetch => "refetch",
            Self::Abort => "abort",
        }
    }

    /// Returns the event type recorded for the decision.
    const fn event_type(self) -> RunEventType {
        match self {
            Self::Approve => RunEventType::Approved,
            Self::Refetch => RunEventType::RefetchRequested,
            Self::Abort => RunEventType::Aborted,
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Inputs to a checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointRequest<'a> {
    /// Run under evaluation.
    pub run_id: &'a RunId,
    /// Token of the worker's lease.
    pub lock_token: &'a LockToken,
    /// Idempotency key for this checkpoint.
    pub action_id: &'a ActionId,
    /// Evidence currently held.
    pub evidence: &'a [EvidenceItem],
    /// Current subject fingerprint, when tracked.
    pub subject_fingerprint: Option<&'a Fingerprint>,
    /// Evaluation time.
    pub now: Timestamp,
}

/// Description of a plain transition.
struct Transition<'a> {
    /// Target run.
    run_id: &'a RunId,
    /// Idempotency key.
    action_id: &'a ActionId,
    /// Statuses the transition may start from.
    from: &'a [RunStatus],
    /// Status entered.
    to: RunStatus,
    /// Lease token required for worker operations.
    token: Option<&'a LockToken>,
    /// Gate nonce the decision must match.
    nonce: Option<&'a ApprovalNonce>,
    /// Event recorded with the transition.
    event_type: RunEventType,
    /// Event payload.
    payload: Value,
    /// Additional patch fields.
    update: RunUpdate,
    /// Whether to remember the prior status for a later resume.
    remember_resume: bool,
}

/// How a checkpoint commits its verdict.
struct GateStep<'a> {
    /// Checkpoint inputs.
    request: CheckpointRequest<'a>,
    /// Status the run was read in.
    from: RunStatus,
    /// Status entered on proceed; `None` keeps the status.
    pass_status: Option<RunStatus>,
    /// Event recorded on proceed.
    pass_event: RunEventType,
}

// ============================================================================
// SECTION: Run Machine
// ============================================================================

/// Run lifecycle driver.
#[derive(Debug, Clone)]
pub struct RunMachine<S, N, T> {
    /// Backing store.
    store: S,
    /// Approval channel.
    notifier: N,
    /// Nonce generator.
    tokens: T,
    /// Gate policy.
    policy: GatePolicy,
}

impl<S, N, T> RunMachine<S, N, T>
where
    S: RunStore,
    N: ApprovalNotifier,
    T: TokenSource,
{
    /// Creates a state machine.
    #[must_use]
    pub const fn new(store: S, notifier: N, tokens: T, policy: GatePolicy) -> Self {
        Self { store, notifier, tokens, policy }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the gate policy.
    #[must_use]
    pub const fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Creates a run in `created`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::RunExists`] when the id is taken.
    pub fn create_run(
        &self,
        run_id: &RunId,
        subject_id: Option<SubjectId>,
        now: Timestamp,
    ) -> Result<RunRecord, MachineError> {
        let record = RunRecord::new(run_id.clone(), subject_id, self.policy.version.clone(), now);
        let event =
            RunEvent::new(run_id.clone(), ActionId::new("create"), RunEventType::Created, now)
                .with_payload(json!({ "policy_version": self.policy.version }));
        match self.store.insert_run(&record, &event) {
            Ok(()) => {
                info!(run_id = %run_id, policy_version = %self.policy.version, "run created");
                Ok(record)
            }
            Err(StoreError::Conflict(_)) => Err(MachineError::RunExists(run_id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a run.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::RunNotFound`] when the run does not exist.
    pub fn run(&self, run_id: &RunId) -> Result<RunRecord, MachineError> {
        self.store.load_run(run_id)?.ok_or_else(|| MachineError::RunNotFound(run_id.clone()))
    }

    /// Returns whether expensive work may proceed on `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::RunNotFound`] when the run does not exist.
    pub fn check_status(&self, run_id: &RunId) -> Result<StatusCheck, MachineError> {
        let status = self.run(run_id)?.status;
        Ok(if status.allows_work() {
            StatusCheck::Proceed(status)
        } else {
            StatusCheck::Refuse(status)
        })
    }

    /// Starts a created run, recording the context pack in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn start(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        context_pack: Option<Value>,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        let snapshot =
            SnapshotChange { started: Some((now, context_pack)), ..SnapshotChange::default() };
        self.transition(Transition {
            run_id,
            action_id,
            from: &[RunStatus::Created],
            to: RunStatus::Started,
            token: Some(token),
            nonce: None,
            event_type: RunEventType::Started,
            payload: json!({ "policy_version": self.policy.version }),
            update: RunUpdate::new(now).snapshot(snapshot),
            remember_resume: false,
        })
    }

    /// Evaluates held evidence before an expensive step.
    ///
    /// When evidence is weak and the run has not used its silent refetch,
    /// `refetcher` is invoked once. Gating moves the run to
    /// `waiting_approval` and notifies the approval channel once.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// evidence is malformed, or the store fails.
    pub fn evaluate_and_gate<R>(
        &self,
        request: CheckpointRequest<'_>,
        refetcher: Option<&mut R>,
    ) -> Result<CheckpointOutcome, MachineError>
    where
        R: EvidenceRefetcher + ?Sized,
    {
        let record = match self.checkpoint_precheck(&request)? {
            Ok(record) => record,
            Err(outcome) => return Ok(outcome),
        };
        if !record.status.allows_work() {
            return Ok(CheckpointOutcome::NotApplied { current: record.status });
        }
        let allow_refetch = self.policy.auto_refetch && !record.auto_refetch_used;
        let ctx = scoring_context(&request);
        let evaluation = CircuitBreaker::new(&self.policy).evaluate(
            request.evidence,
            if allow_refetch { refetcher } else { None },
            &ctx,
        );
        self.commit_gate_step(
            GateStep {
                request,
                from: record.status,
                pass_status: None,
                pass_event: RunEventType::CheckpointPassed,
            },
            evaluation,
        )
    }

    /// Evaluates freshly gathered evidence for a run in `refetch`.
    ///
    /// Passing evidence resumes the run in `started`; otherwise the gate
    /// reopens with a new nonce. The silent refetch budget is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// evidence is malformed, or the store fails.
    pub fn resolve_refetch(
        &self,
        request: CheckpointRequest<'_>,
    ) -> Result<CheckpointOutcome, MachineError> {
        let record = match self.checkpoint_precheck(&request)? {
            Ok(record) => record,
            Err(outcome) => return Ok(outcome),
        };
        if record.status != RunStatus::Refetch {
            return Ok(CheckpointOutcome::NotApplied { current: record.status });
        }
        let ctx = scoring_context(&request);
        let report = CircuitBreaker::new(&self.policy).assess(request.evidence, &ctx);
        let evaluation = BreakerEvaluation { report, evidence: request.evidence.to_vec() };
        self.commit_gate_step(
            GateStep {
                request,
                from: RunStatus::Refetch,
                pass_status: Some(RunStatus::Started),
                pass_event: RunEventType::RefetchResolved,
            },
            evaluation,
        )
    }

    /// Applies a human decision to a run in `waiting_approval`.
    ///
    /// When `nonce` is supplied it must match the open gate.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing or the store fails.
    pub fn decide(
        &self,
        run_id: &RunId,
        decision: GateDecision,
        action_id: &ActionId,
        nonce: Option<&ApprovalNonce>,
        actor_id: &ActorId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        self.transition(Transition {
            run_id,
            action_id,
            from: &[RunStatus::WaitingApproval],
            to: decision.target(),
            token: None,
            nonce,
            event_type: decision.event_type(),
            payload: json!({ "decision": decision.as_str(), "actor_id": actor_id }),
            update: RunUpdate::new(now).nonce(None),
            remember_resume: false,
        })
    }

    /// Moves an approved or started run into `running`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn begin_work(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        self.worker_transition(
            run_id,
            token,
            action_id,
            &[RunStatus::Started, RunStatus::Approved],
            RunStatus::Running,
            RunEventType::Running,
            now,
        )
    }

    /// Completes a running run and releases its lease.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn complete(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        self.worker_transition(
            run_id,
            token,
            action_id,
            &[RunStatus::Running],
            RunStatus::Done,
            RunEventType::Completed,
            now,
        )
    }

    /// Fails a run with an error code and releases its lease.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn fail(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        error_code: &str,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        let snapshot = SnapshotChange {
            error_code: Some(error_code.to_string()),
            ..SnapshotChange::default()
        };
        self.transition(Transition {
            run_id,
            action_id,
            from: &[RunStatus::Started, RunStatus::Approved, RunStatus::Running],
            to: RunStatus::Failed,
            token: Some(token),
            nonce: None,
            event_type: RunEventType::Failed,
            payload: json!({ "error_code": error_code }),
            update: RunUpdate::new(now).snapshot(snapshot),
            remember_resume: false,
        })
    }

    /// Pauses a working run, remembering the status to resume into.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn pause(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        self.transition(Transition {
            run_id,
            action_id,
            from: &[RunStatus::Started, RunStatus::Approved, RunStatus::Running],
            to: RunStatus::Paused,
            token: Some(token),
            nonce: None,
            event_type: RunEventType::Paused,
            payload: Value::Null,
            update: RunUpdate::new(now),
            remember_resume: true,
        })
    }

    /// Resumes a paused run into the status it was paused from.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing, the lease is not held,
    /// or the store fails.
    pub fn resume(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        let record = self.run(run_id)?;
        let to = record.snapshot.resume_status.unwrap_or(RunStatus::Started);
        let snapshot = SnapshotChange { resume_status: Some(None), ..SnapshotChange::default() };
        self.transition(Transition {
            run_id,
            action_id,
            from: &[RunStatus::Paused],
            to,
            token: Some(token),
            nonce: None,
            event_type: RunEventType::Resumed,
            payload: json!({ "resumed_to": to }),
            update: RunUpdate::new(now).snapshot(snapshot),
            remember_resume: false,
        })
    }

    /// Aborts a run from any non-terminal status and releases its lease.
    ///
    /// Aborting a terminal run is a no-op reported as not applied.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] when the run is missing or the store fails.
    pub fn abort(
        &self,
        run_id: &RunId,
        action_id: &ActionId,
        reason: &str,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        /// Every non-terminal status.
        const LIVE: [RunStatus; 7] = [
            RunStatus::Created,
            RunStatus::Started,
            RunStatus::Paused,
            RunStatus::Refetch,
            RunStatus::WaitingApproval,
            RunStatus::Approved,
            RunStatus::Running,
        ];
        self.transition(Transition {
            run_id,
            action_id,
            from: &LIVE,
            to: RunStatus::Aborted,
            token: None,
            nonce: None,
            event_type: RunEventType::Aborted,
            payload: json!({ "reason": reason }),
            update: RunUpdate::new(now),
            remember_resume: false,
        })
    }

    /// Returns the events of a run in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the store fails.
    pub fn events(&self, run_id: &RunId) -> Result<Vec<RunEvent>, MachineError> {
        Ok(self.store.list_events(run_id)?)
    }

    /// Returns the evidence linked to a run.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the store fails.
    pub fn evidence(&self, run_id: &RunId) -> Result<Vec<EvidenceItem>, MachineError> {
        Ok(self.store.run_evidence(run_id)?)
    }

    /// Removes the evidence links of a run that did not complete.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Retained`] (wrapped) when the run is `done`.
    pub fn discard_evidence(&self, run_id: &RunId) -> Result<usize, MachineError> {
        Ok(self.store.unlink_evidence(run_id)?)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Worker transition with no extra patch fields.
    #[allow(clippy::too_many_arguments, reason = "Mirrors the transition fields one to one.")]
    fn worker_transition(
        &self,
        run_id: &RunId,
        token: &LockToken,
        action_id: &ActionId,
        from: &[RunStatus],
        to: RunStatus,
        event_type: RunEventType,
        now: Timestamp,
    ) -> Result<TransitionOutcome, MachineError> {
        self.transition(Transition {
            run_id,
            action_id,
            from,
            to,
            token: Some(token),
            nonce: None,
            event_type,
            payload: Value::Null,
            update: RunUpdate::new(now),
            remember_resume: false,
        })
    }

    /// Runs a guarded transition.
    fn transition(&self, step: Transition<'_>) -> Result<TransitionOutcome, MachineError> {
        let now = step.update.at;
        let record = self.run(step.run_id)?;
        if self.store.find_event(step.run_id, step.action_id)?.is_some() {
            return Ok(TransitionOutcome::AlreadyApplied(record));
        }
        if !step.from.contains(&record.status) || !record.status.can_transition_to(step.to) {
            return Ok(TransitionOutcome::NotApplied { current: record.status });
        }
        if let Some(nonce) = step.nonce
            && record.approval_nonce.as_ref() != Some(nonce)
        {
            return Ok(TransitionOutcome::NotApplied { current: record.status });
        }
        if let Some(token) = step.token
            && !record.lease_held_by(token, now)
        {
            return Err(MachineError::LeaseNotHeld(step.run_id.clone()));
        }

        let mut guards = vec![UpdateGuard::StatusIs(record.status)];
        if let Some(token) = step.token {
            guards.push(UpdateGuard::LeaseHeldBy { token: token.clone(), now });
        }
        if let Some(nonce) = step.nonce {
            guards.push(UpdateGuard::NonceIs(nonce.clone()));
        }
        let mut update = step.update.status(step.to).action(step.action_id.clone());
        if step.remember_resume {
            update.snapshot.resume_status = Some(Some(record.status));
        }
        let event = RunEvent::new(step.run_id.clone(), step.action_id.clone(), step.event_type, now)
            .with_payload(step.payload);
        let conditional =
            ConditionalUpdate::new(step.run_id.clone(), guards, update).with_event(event);

        match self.store.conditional_update(&conditional)? {
            UpdateOutcome::Applied(next) => {
                info!(
                    run_id = %step.run_id,
                    from = record.status.as_str(),
                    to = step.to.as_str(),
                    action_id = %step.action_id,
                    "run transition applied"
                );
                Ok(TransitionOutcome::Applied(next))
            }
            UpdateOutcome::Duplicate(current) => Ok(TransitionOutcome::AlreadyApplied(current)),
            UpdateOutcome::Mismatch(current) => {
                if let Some(token) = step.token
                    && current.status == record.status
                    && !current.lease_held_by(token, now)
                {
                    return Err(MachineError::LeaseNotHeld(step.run_id.clone()));
                }
                warn!(
                    run_id = %step.run_id,
                    expected = record.status.as_str(),
                    current = current.status.as_str(),
                    "run transition not applied"
                );
                Ok(TransitionOutcome::NotApplied { current: current.status })
            }
            UpdateOutcome::NotFound => Err(MachineError::RunNotFound(step.run_id.clone())),
        }
    }

    /// Shared checkpoint prechecks: existence, idempotency, lease, evidence shape.
    fn checkpoint_precheck(
        &self,
        request: &CheckpointRequest<'_>,
    ) -> Result<Result<RunRecord, CheckpointOutcome>, MachineError> {
        let record = self.run(request.run_id)?;
        if self.store.find_event(request.run_id, request.action_id)?.is_some() {
            return Ok(Err(CheckpointOutcome::AlreadyRecorded(record)));
        }
        if record.status.is_terminal() {
            return Ok(Err(CheckpointOutcome::NotApplied { current: record.status }));
        }
        if !record.lease_held_by(request.lock_token, request.now) {
            return Err(MachineError::LeaseNotHeld(request.run_id.clone()));
        }
        if let Some(message) = request.evidence.iter().find_map(EvidenceItem::validation_error) {
            return Err(MachineError::InvalidEvidence(message));
        }
        Ok(Ok(record))
    }

    /// Commits the breaker verdict and links its evidence in one update.
    fn commit_gate_step(
        &self,
        step: GateStep<'_>,
        evaluation: BreakerEvaluation,
    ) -> Result<CheckpointOutcome, MachineError> {
        let GateStep { request, from, pass_status, pass_event } = step;
        let now = request.now;
        let report = evaluation.report;
        let guards = vec![
            UpdateGuard::StatusIs(from),
            UpdateGuard::LeaseHeldBy { token: request.lock_token.clone(), now },
        ];
        let snapshot = SnapshotChange {
            last_breaker: Some(report.summary(now)),
            checkpoint_marker: !report.should_gate() && pass_status.is_none(),
            ..SnapshotChange::default()
        };
        let mut update = RunUpdate::new(now)
            .snapshot(snapshot)
            .consume_auto_refetch(report.refetched)
            .action(request.action_id.clone());

        let nonce = report.should_gate().then(|| self.tokens.approval_nonce());
        let event = match &nonce {
            None => {
                if let Some(status) = pass_status {
                    update = update.status(status);
                }
                RunEvent::new(request.run_id.clone(), request.action_id.clone(), pass_event, now)
                    .with_payload(json!({
                        "score": report.score.overall,
                        "refetched": report.refetched,
                        "warnings": report.score.warnings(),
                    }))
            }
            Some(nonce) => {
                update = update.status(RunStatus::WaitingApproval).nonce(Some(nonce.clone()));
                RunEvent::new(
                    request.run_id.clone(),
                    request.action_id.clone(),
                    RunEventType::GateOpened,
                    now,
                )
                .with_payload(json!({
                    "verdict": report.verdict.as_str(),
                    "reason": report.reason,
                    "score": report.score.overall,
                    "refetched": report.refetched,
                    "nonce": nonce,
                }))
            }
        };
        let mut conditional = ConditionalUpdate::new(request.run_id.clone(), guards, update)
            .with_event(event)
            .with_evidence(request.evidence);
        if report.refetched {
            conditional = conditional.with_evidence(&evaluation.evidence);
        }

        match self.store.conditional_update(&conditional)? {
            UpdateOutcome::Applied(record) => match nonce {
                None => {
                    info!(
                        run_id = %request.run_id,
                        score = report.score.overall,
                        "checkpoint passed"
                    );
                    Ok(CheckpointOutcome::Proceed { record, report })
                }
                Some(nonce) => {
                    let notified = self.notify_gate(request.run_id, &nonce, &report);
                    Ok(CheckpointOutcome::Gated { record, report, nonce, notified })
                }
            },
            UpdateOutcome::Duplicate(record) => Ok(CheckpointOutcome::AlreadyRecorded(record)),
            UpdateOutcome::Mismatch(current) => {
                if current.status == from && !current.lease_held_by(request.lock_token, now) {
                    return Err(MachineError::LeaseNotHeld(request.run_id.clone()));
                }
                Ok(CheckpointOutcome::NotApplied { current: current.status })
            }
            UpdateOutcome::NotFound => Err(MachineError::RunNotFound(request.run_id.clone())),
        }
    }

    /// Sends the approval request for a committed gate.
    fn notify_gate(&self, run_id: &RunId, nonce: &ApprovalNonce, report: &BreakerReport) -> bool {
        let request = ApprovalRequest {
            run_id: run_id.clone(),
            nonce: nonce.clone(),
            reason: report.reason.clone().unwrap_or_else(|| report.verdict.as_str().to_string()),
        };
        info!(run_id = %run_id, verdict = report.verdict.as_str(), "gate opened");
        match self.notifier.notify(&request) {
            Ok(()) => true,
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "approval notification failed");
                false
            }
        }
    }
}

/// Builds the scoring context of a checkpoint request.
fn scoring_context<'a>(request: &CheckpointRequest<'a>) -> ScoringContext<'a> {
    ScoringContext { now: request.now, subject_fingerprint: request.subject_fingerprint }
}
