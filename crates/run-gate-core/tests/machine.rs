// crates/run-gate-core/tests/machine.rs
// ============================================================================
// Module: Run State Machine Tests
// Description: Guarded transitions, checkpoints, and the work gate.
// ============================================================================
//! ## Overview
//! Validates the lifecycle table, lease-gated worker transitions, checkpoint
//! idempotency, the refetch budget, and pause/resume.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use common::Harness;
use common::NoRefetch;
use common::at;
use common::minutes;
use common::policy;
use common::price;
use run_gate_core::ActionId;
use run_gate_core::ActorId;
use run_gate_core::CheckpointOutcome;
use run_gate_core::CheckpointRequest;
use run_gate_core::ClaimType;
use run_gate_core::EvidenceItem;
use run_gate_core::GateDecision;
use run_gate_core::LockToken;
use run_gate_core::MachineError;
use run_gate_core::RefetchError;
use run_gate_core::RunEventType;
use run_gate_core::RunId;
use run_gate_core::RunStatus;
use run_gate_core::RunStore;
use run_gate_core::StatusCheck;
use run_gate_core::StoreError;
use run_gate_core::TransitionOutcome;
use serde_json::json;

fn request<'a>(
    run_id: &'a RunId,
    token: &'a LockToken,
    action_id: &'a ActionId,
    evidence: &'a [EvidenceItem],
    offset_ms: i64,
) -> CheckpointRequest<'a> {
    CheckpointRequest {
        run_id,
        lock_token: token,
        action_id,
        evidence,
        subject_fingerprint: None,
        now: at(offset_ms),
    }
}

fn status(h: &Harness, run_id: &RunId) -> RunStatus {
    h.machine.run(run_id).unwrap().status
}

/// Starts a run and gates it on weak evidence without a refetcher.
fn gated_run(h: &Harness, run: &str) -> (RunId, LockToken, run_gate_core::ApprovalNonce) {
    let (run_id, token) = h.started_run(run);
    let evidence = [price("p-weak", 0.3)];
    let action = ActionId::new("cp-1");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &evidence, 10), None::<&mut NoRefetch>)
        .unwrap();
    let CheckpointOutcome::Gated { nonce, .. } = outcome else {
        panic!("expected gate, got {outcome:?}");
    };
    (run_id, token, nonce)
}

// ============================================================================
// SECTION: Creation and Start
// ============================================================================

#[test]
fn create_run_rejects_duplicates() {
    let h = Harness::new(policy());
    let run_id = RunId::new("run-1");
    let record = h.machine.create_run(&run_id, None, at(0)).unwrap();
    assert_eq!(record.status, RunStatus::Created);
    assert_eq!(record.policy_version, "test-v1");
    let err = h.machine.create_run(&run_id, None, at(1)).unwrap_err();
    assert!(matches!(err, MachineError::RunExists(_)));
    let events = h.machine.events(&run_id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, RunEventType::Created);
    assert_eq!(events[0].seq, 1);
}

#[test]
fn start_requires_the_lease() {
    let h = Harness::new(policy());
    let (run_id, _token) = h.claimed_run("run-1", "worker-1");
    let err = h
        .machine
        .start(&run_id, &LockToken::new("forged"), &ActionId::new("start"), None, at(1))
        .unwrap_err();
    assert!(matches!(err, MachineError::LeaseNotHeld(_)));
    assert_eq!(status(&h, &run_id), RunStatus::Created);
}

#[test]
fn start_records_context_and_is_idempotent() {
    let h = Harness::new(policy());
    let (run_id, token) = h.claimed_run("run-1", "worker-1");
    let action = ActionId::new("start");
    let context = json!({ "brief": "phone launch" });
    let first = h.machine.start(&run_id, &token, &action, Some(context.clone()), at(5)).unwrap();
    let TransitionOutcome::Applied(record) = first else {
        panic!("expected applied, got {first:?}");
    };
    assert_eq!(record.snapshot.started_at, Some(at(5)));
    assert_eq!(record.snapshot.context_pack, Some(context));

    let second = h.machine.start(&run_id, &token, &action, None, at(6)).unwrap();
    assert!(matches!(second, TransitionOutcome::AlreadyApplied(_)));
    let started = h
        .machine
        .events(&run_id)
        .unwrap()
        .iter()
        .filter(|event| event.event_type == RunEventType::Started)
        .count();
    assert_eq!(started, 1);
}

#[test]
fn check_status_gates_expensive_work() {
    let h = Harness::new(policy());
    let (run_id, token) = h.claimed_run("run-1", "worker-1");
    assert_eq!(h.machine.check_status(&run_id).unwrap(), StatusCheck::Refuse(RunStatus::Created));
    h.machine.start(&run_id, &token, &ActionId::new("start"), None, at(1)).unwrap();
    assert!(h.machine.check_status(&run_id).unwrap().is_proceed());
    assert!(matches!(
        h.machine.check_status(&RunId::new("missing")),
        Err(MachineError::RunNotFound(_))
    ));
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

#[test]
fn passing_checkpoint_continues_in_place() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let evidence = [price("p1", 0.9)];
    let action = ActionId::new("cp-1");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &evidence, 10), None::<&mut NoRefetch>)
        .unwrap();
    let CheckpointOutcome::Proceed { record, .. } = outcome else {
        panic!("expected proceed, got {outcome:?}");
    };
    assert_eq!(record.status, RunStatus::Started);
    assert!(record.snapshot.last_breaker.is_some());
    let marker = record.snapshot.markers.last().unwrap();
    assert_eq!(marker.action_id.as_ref(), Some(&action));
    assert_eq!(h.notifier.count(), 0);
    assert_eq!(h.machine.evidence(&run_id).unwrap().len(), 1);
    assert!(
        h.machine
            .events(&run_id)
            .unwrap()
            .iter()
            .any(|event| event.event_type == RunEventType::CheckpointPassed)
    );
}

#[test]
fn gating_checkpoint_stamps_nonce_and_notifies_once() {
    let h = Harness::new(policy());
    let (run_id, token, nonce) = gated_run(&h, "run-1");
    let record = h.machine.run(&run_id).unwrap();
    assert_eq!(record.status, RunStatus::WaitingApproval);
    assert_eq!(record.approval_nonce.as_ref(), Some(&nonce));
    let requests = h.notifier.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].run_id, run_id);
    assert_eq!(requests[0].nonce, nonce);
    assert!(requests[0].reason.contains("below threshold"));

    // Replaying the same checkpoint is absorbed by its action id.
    let evidence = [price("p-weak", 0.3)];
    let action = ActionId::new("cp-1");
    let replay = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &evidence, 20), None::<&mut NoRefetch>)
        .unwrap();
    assert!(matches!(replay, CheckpointOutcome::AlreadyRecorded(_)));
    assert_eq!(h.notifier.count(), 1);
    assert_eq!(
        h.machine.check_status(&run_id).unwrap(),
        StatusCheck::Refuse(RunStatus::WaitingApproval)
    );
}

#[test]
fn checkpoint_without_lease_or_with_bad_evidence_is_rejected() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let good = [price("p1", 0.9)];
    let action = ActionId::new("cp-1");
    let forged = LockToken::new("forged");
    let err = h
        .machine
        .evaluate_and_gate(request(&run_id, &forged, &action, &good, 10), None::<&mut NoRefetch>)
        .unwrap_err();
    assert!(matches!(err, MachineError::LeaseNotHeld(_)));

    let bad = [price("p2", 1.5)];
    let err = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &bad, 10), None::<&mut NoRefetch>)
        .unwrap_err();
    assert!(matches!(err, MachineError::InvalidEvidence(_)));
    assert!(h.machine.events(&run_id).unwrap().iter().all(|event| event.action_id != action));
}

#[test]
fn checkpoint_that_loses_its_lease_links_no_evidence() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let mut refetch = |_: &[ClaimType]| -> Result<Vec<EvidenceItem>, RefetchError> {
        h.leases.release(&token, at(5)).unwrap();
        Ok(vec![price("p-refetched", 0.9)])
    };
    let weak = [price("p-weak", 0.3)];
    let action = ActionId::new("cp-1");
    let err = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &weak, 10), Some(&mut refetch))
        .unwrap_err();
    assert!(matches!(err, MachineError::LeaseNotHeld(_)));
    assert!(h.store.run_evidence(&run_id).unwrap().is_empty());
    let record = h.machine.run(&run_id).unwrap();
    assert_eq!(record.status, RunStatus::Started);
    assert!(!record.auto_refetch_used);
    assert!(h.machine.events(&run_id).unwrap().iter().all(|event| event.action_id != action));
}

#[test]
fn checkpoint_with_conflicting_evidence_changes_nothing() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    h.store.record_evidence(&run_id, &[price("p1", 0.9)]).unwrap();
    let changed = [price("p1", 0.8)];
    let action = ActionId::new("cp-1");
    let err = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &changed, 10), None::<&mut NoRefetch>)
        .unwrap_err();
    assert!(matches!(err, MachineError::Store(StoreError::Invalid(_))));
    assert_eq!(status(&h, &run_id), RunStatus::Started);
    assert_eq!(h.store.run_evidence(&run_id).unwrap(), vec![price("p1", 0.9)]);
    assert!(h.machine.events(&run_id).unwrap().iter().all(|event| event.action_id != action));
}

#[test]
fn checkpoint_is_refused_outside_working_states() {
    let h = Harness::new(policy());
    let (run_id, token) = h.claimed_run("run-1", "worker-1");
    let evidence = [price("p1", 0.9)];
    let action = ActionId::new("cp-1");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &evidence, 10), None::<&mut NoRefetch>)
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::NotApplied { current: RunStatus::Created });
}

#[test]
fn silent_refetch_is_used_at_most_once_per_run() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let mut calls = 0_usize;
    let mut refetch = |_: &[ClaimType]| -> Result<Vec<EvidenceItem>, RefetchError> {
        calls += 1;
        Ok(vec![price(&format!("p-fresh-{calls}"), 0.9)])
    };

    let weak = [price("p1", 0.3)];
    let first = ActionId::new("cp-1");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &first, &weak, 10), Some(&mut refetch))
        .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Proceed { .. }));
    assert!(h.machine.run(&run_id).unwrap().auto_refetch_used);

    let second = ActionId::new("cp-2");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &second, &weak, 20), Some(&mut refetch))
        .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Gated { .. }));
    assert_eq!(calls, 1);
}

#[test]
fn disabled_auto_refetch_never_calls_the_refetcher() {
    let h = Harness::new(policy().with_auto_refetch(false));
    let (run_id, token) = h.started_run("run-1");
    let mut calls = 0_usize;
    let mut refetch = |_: &[ClaimType]| -> Result<Vec<EvidenceItem>, RefetchError> {
        calls += 1;
        Ok(Vec::new())
    };
    let weak = [price("p1", 0.3)];
    let action = ActionId::new("cp-1");
    let outcome = h
        .machine
        .evaluate_and_gate(request(&run_id, &token, &action, &weak, 10), Some(&mut refetch))
        .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Gated { .. }));
    assert_eq!(calls, 0);
    assert!(!h.machine.run(&run_id).unwrap().auto_refetch_used);
}

// ============================================================================
// SECTION: Decisions and Refetch
// ============================================================================

#[test]
fn decision_with_stale_nonce_is_not_applied() {
    let h = Harness::new(policy());
    let (run_id, _token, _nonce) = gated_run(&h, "run-1");
    let outcome = h
        .machine
        .decide(
            &run_id,
            GateDecision::Approve,
            &ActionId::new("d-1"),
            Some(&"stale".into()),
            &ActorId::new("ops"),
            at(100),
        )
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::NotApplied { current: RunStatus::WaitingApproval });
}

#[test]
fn approval_clears_nonce_and_allows_work() {
    let h = Harness::new(policy());
    let (run_id, token, nonce) = gated_run(&h, "run-1");
    let outcome = h
        .machine
        .decide(
            &run_id,
            GateDecision::Approve,
            &ActionId::new("d-1"),
            Some(&nonce),
            &ActorId::new("ops"),
            at(100),
        )
        .unwrap();
    let TransitionOutcome::Applied(record) = outcome else {
        panic!("expected applied, got {outcome:?}");
    };
    assert_eq!(record.status, RunStatus::Approved);
    assert!(record.approval_nonce.is_none());
    assert!(h.machine.check_status(&run_id).unwrap().is_proceed());
    let begun = h.machine.begin_work(&run_id, &token, &ActionId::new("begin"), at(200)).unwrap();
    assert!(begun.is_applied());
}

#[test]
fn human_refetch_resolves_without_touching_the_budget() {
    let h = Harness::new(policy());
    let (run_id, token, nonce) = gated_run(&h, "run-1");
    let outcome = h
        .machine
        .decide(
            &run_id,
            GateDecision::Refetch,
            &ActionId::new("d-1"),
            Some(&nonce),
            &ActorId::new("ops"),
            at(100),
        )
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(status(&h, &run_id), RunStatus::Refetch);

    // Still weak: the gate reopens with a new nonce and a second notification.
    let weak = [price("p-weak-2", 0.35)];
    let action = ActionId::new("rf-1");
    let reopened =
        h.machine.resolve_refetch(request(&run_id, &token, &action, &weak, 200)).unwrap();
    let CheckpointOutcome::Gated { nonce: second_nonce, .. } = reopened else {
        panic!("expected gate, got {reopened:?}");
    };
    assert_ne!(second_nonce, nonce);
    assert_eq!(h.notifier.count(), 2);

    h.machine
        .decide(
            &run_id,
            GateDecision::Refetch,
            &ActionId::new("d-2"),
            Some(&second_nonce),
            &ActorId::new("ops"),
            at(300),
        )
        .unwrap();
    let strong = [price("p-strong", 0.95)];
    let action = ActionId::new("rf-2");
    let resolved =
        h.machine.resolve_refetch(request(&run_id, &token, &action, &strong, 400)).unwrap();
    let CheckpointOutcome::Proceed { record, .. } = resolved else {
        panic!("expected proceed, got {resolved:?}");
    };
    assert_eq!(record.status, RunStatus::Started);
    assert!(!record.auto_refetch_used);
    assert!(
        h.machine
            .events(&run_id)
            .unwrap()
            .iter()
            .any(|event| event.event_type == RunEventType::RefetchResolved)
    );
}

#[test]
fn resolve_refetch_requires_refetch_status() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let evidence = [price("p1", 0.9)];
    let action = ActionId::new("rf-1");
    let outcome =
        h.machine.resolve_refetch(request(&run_id, &token, &action, &evidence, 10)).unwrap();
    assert_eq!(outcome, CheckpointOutcome::NotApplied { current: RunStatus::Started });
}

// ============================================================================
// SECTION: Worker Transitions
// ============================================================================

#[test]
fn invalid_transitions_are_not_applied() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let outcome = h.machine.complete(&run_id, &token, &ActionId::new("done"), at(1)).unwrap();
    assert_eq!(outcome, TransitionOutcome::NotApplied { current: RunStatus::Started });
}

#[test]
fn pause_resumes_into_the_prior_status() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    h.machine.begin_work(&run_id, &token, &ActionId::new("begin"), at(1)).unwrap();
    let paused = h.machine.pause(&run_id, &token, &ActionId::new("pause-1"), at(2)).unwrap();
    assert!(paused.is_applied());
    assert_eq!(h.machine.check_status(&run_id).unwrap(), StatusCheck::Refuse(RunStatus::Paused));
    let record = h.machine.run(&run_id).unwrap();
    assert_eq!(record.snapshot.resume_status, Some(RunStatus::Running));

    let resumed = h.machine.resume(&run_id, &token, &ActionId::new("resume-1"), at(3)).unwrap();
    let TransitionOutcome::Applied(record) = resumed else {
        panic!("expected applied, got {resumed:?}");
    };
    assert_eq!(record.status, RunStatus::Running);
    assert_eq!(record.snapshot.resume_status, None);
}

#[test]
fn completion_releases_lease_and_retains_evidence() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let evidence = [price("p1", 0.9)];
    let action = ActionId::new("cp-1");
    h.machine
        .evaluate_and_gate(request(&run_id, &token, &action, &evidence, 10), None::<&mut NoRefetch>)
        .unwrap();
    h.machine.begin_work(&run_id, &token, &ActionId::new("begin"), at(20)).unwrap();
    let done = h.machine.complete(&run_id, &token, &ActionId::new("done"), at(30)).unwrap();
    let TransitionOutcome::Applied(record) = done else {
        panic!("expected applied, got {done:?}");
    };
    assert_eq!(record.status, RunStatus::Done);
    assert!(record.lease.is_none());
    assert!(matches!(
        h.machine.discard_evidence(&run_id),
        Err(MachineError::Store(StoreError::Retained(_)))
    ));
    assert_eq!(h.store.run_evidence(&run_id).unwrap().len(), 1);
}

#[test]
fn failure_records_error_code() {
    let h = Harness::new(policy());
    let (run_id, token) = h.started_run("run-1");
    let failed =
        h.machine.fail(&run_id, &token, &ActionId::new("fail"), "render_timeout", at(5)).unwrap();
    let TransitionOutcome::Applied(record) = failed else {
        panic!("expected applied, got {failed:?}");
    };
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.snapshot.error_code.as_deref(), Some("render_timeout"));
    assert!(record.lease.is_none());
}

#[test]
fn abort_from_any_live_state_and_noop_when_terminal() {
    let h = Harness::new(policy());
    let (run_id, _token, _nonce) = gated_run(&h, "run-1");
    let aborted = h.machine.abort(&run_id, &ActionId::new("abort-1"), "operator", at(50)).unwrap();
    assert!(aborted.is_applied());
    let record = h.machine.run(&run_id).unwrap();
    assert_eq!(record.status, RunStatus::Aborted);
    assert!(record.approval_nonce.is_none());
    let again = h.machine.abort(&run_id, &ActionId::new("abort-2"), "operator", at(60)).unwrap();
    assert_eq!(again, TransitionOutcome::NotApplied { current: RunStatus::Aborted });
}

#[test]
fn lease_stays_valid_while_waiting_for_approval() {
    let h = Harness::new(policy());
    let (run_id, token, _nonce) = gated_run(&h, "run-1");
    assert!(h.leases.heartbeat(&token, at(minutes(5))).unwrap());
    assert!(h.leases.heartbeat(&token, at(minutes(12))).unwrap());
    assert_eq!(status(&h, &run_id), RunStatus::WaitingApproval);
}
