// crates/run-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Run Gate Core Test Helpers
// Description: Shared fixtures for run gate integration tests.
// ============================================================================
//! ## Overview
//! Builds a policy, evidence items, and a machine wired to the in-memory store,
//! a deterministic token source, and a notifier that records every request.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Shared helpers are used by a subset of test binaries."
)]

use std::sync::Arc;
use std::sync::Mutex;

use run_gate_core::ActionId;
use run_gate_core::ApprovalNotifier;
use run_gate_core::ApprovalRequest;
use run_gate_core::ClaimOutcome;
use run_gate_core::ClaimPolicy;
use run_gate_core::ClaimType;
use run_gate_core::EvidenceItem;
use run_gate_core::GatePolicy;
use run_gate_core::InMemoryRunStore;
use run_gate_core::LeaseBounds;
use run_gate_core::LeaseManager;
use run_gate_core::LockToken;
use run_gate_core::NotifyError;
use run_gate_core::RefetchError;
use run_gate_core::RunId;
use run_gate_core::RunMachine;
use run_gate_core::SequentialTokenSource;
use run_gate_core::Tier;
use run_gate_core::Timestamp;
use run_gate_core::TransitionOutcome;
use run_gate_core::WorkerId;
use serde_json::Value;
use serde_json::json;

/// Base timestamp for every test (2025-10-09T08:53:20Z).
pub const T0: i64 = 1_760_000_000_000;

pub fn at(offset_ms: i64) -> Timestamp {
    Timestamp::from_unix_millis(T0 + offset_ms)
}

pub fn minutes(count: i64) -> i64 {
    count * 60_000
}

/// Policy: `price` Tier A (required), `specs` Tier B, `tagline` Tier C.
pub fn policy() -> GatePolicy {
    GatePolicy::new("test-v1")
        .with_claim("price", ClaimPolicy::new(Tier::A).with_freshness_minutes(60))
        .with_claim("specs", ClaimPolicy::new(Tier::B))
        .with_claim("tagline", ClaimPolicy::new(Tier::C))
}

pub fn item(id: &str, claim: &str, value: Value, confidence: f64) -> EvidenceItem {
    EvidenceItem::new(id, claim, value, confidence, 3, "shop", at(0))
}

pub fn sourced(
    id: &str,
    claim: &str,
    value: Value,
    confidence: f64,
    trust_tier: u8,
    source: &str,
) -> EvidenceItem {
    EvidenceItem::new(id, claim, value, confidence, trust_tier, source, at(0))
}

pub fn price(id: &str, confidence: f64) -> EvidenceItem {
    item(id, "price", json!(199.0), confidence)
}

/// Refetcher type used to spell `None` for checkpoints without a refetcher.
pub type NoRefetch = fn(&[ClaimType]) -> Result<Vec<EvidenceItem>, RefetchError>;

// ============================================================================
// SECTION: Recording Notifier
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,
}

impl RecordingNotifier {
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ApprovalNotifier for RecordingNotifier {
    fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

pub type Tokens = Arc<SequentialTokenSource>;
pub type TestMachine = RunMachine<InMemoryRunStore, RecordingNotifier, Tokens>;
pub type TestLeases = LeaseManager<InMemoryRunStore, Tokens>;

pub struct Harness {
    pub store: InMemoryRunStore,
    pub notifier: RecordingNotifier,
    pub machine: TestMachine,
    pub leases: TestLeases,
}

impl Harness {
    pub fn new(policy: GatePolicy) -> Self {
        let store = InMemoryRunStore::new();
        let tokens: Tokens = Arc::new(SequentialTokenSource::new());
        let notifier = RecordingNotifier::default();
        let machine =
            RunMachine::new(store.clone(), notifier.clone(), Arc::clone(&tokens), policy);
        let leases = LeaseManager::new(store.clone(), tokens, LeaseBounds::default());
        Self { store, notifier, machine, leases }
    }

    /// Creates a run and claims it for `worker` with a ten-minute lease.
    pub fn claimed_run(&self, run: &str, worker: &str) -> (RunId, LockToken) {
        let run_id = RunId::new(run);
        self.machine.create_run(&run_id, None, at(0)).unwrap();
        let outcome = self.leases.claim(&run_id, &WorkerId::new(worker), 10, None, at(0)).unwrap();
        let ClaimOutcome::Granted(grant) = outcome else {
            panic!("claim denied");
        };
        (run_id, grant.lock_token)
    }

    /// Creates, claims, and starts a run.
    pub fn started_run(&self, run: &str) -> (RunId, LockToken) {
        let (run_id, token) = self.claimed_run(run, "worker-1");
        let outcome =
            self.machine.start(&run_id, &token, &ActionId::new("start"), None, at(0)).unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        (run_id, token)
    }
}
