// crates/run-gate-core/src/runtime/store.rs
// ============================================================================
// Module: Run Gate In-Memory Store
// Description: Mutex-guarded in-memory run store for tests and local demos.
// Purpose: Provide a deterministic store with the same atomicity as durable backends.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryRunStore`] keeps every table behind one mutex so a conditional
//! update (duplicate check, guard check, row write, event insert) is a single
//! critical section. Clones share the same state, which lets several
//! components in one process coordinate through it the way separate workers
//! coordinate through a durable store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::ActionId;
use crate::core::ConditionalUpdate;
use crate::core::EventAppend;
use crate::core::EvidenceItem;
use crate::core::Fingerprint;
use crate::core::LockToken;
use crate::core::RunEvent;
use crate::core::RunId;
use crate::core::RunRecord;
use crate::core::RunStatus;
use crate::core::SubjectId;
use crate::core::Timestamp;
use crate::core::UpdateOutcome;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Tables held by the in-memory store.
#[derive(Debug, Default)]
struct MemoryTables {
    /// Run rows by run id.
    runs: BTreeMap<RunId, RunRecord>,
    /// Events per run in insertion order.
    events: BTreeMap<RunId, Vec<RunEvent>>,
    /// Evidence items by id.
    evidence: BTreeMap<String, EvidenceItem>,
    /// Evidence ids linked to each run.
    links: BTreeMap<RunId, BTreeSet<String>>,
    /// Subject fingerprints.
    fingerprints: BTreeMap<SubjectId, (Fingerprint, Timestamp)>,
}

impl MemoryTables {
    /// Returns true when `(run_id, action_id)` is already recorded.
    fn has_event(&self, run_id: &RunId, action_id: &ActionId) -> bool {
        self.events
            .get(run_id)
            .is_some_and(|events| events.iter().any(|event| &event.action_id == action_id))
    }

    /// Inserts an event, assigning the next sequence number.
    fn push_event(&mut self, event: &RunEvent) -> u64 {
        let events = self.events.entry(event.run_id.clone()).or_default();
        let seq = events.last().map_or(1, |last| last.seq + 1);
        let mut stored = event.clone();
        stored.seq = seq;
        events.push(stored);
        seq
    }

    /// Fails when an item conflicts with a stored item of the same id.
    fn check_evidence(&self, items: &[EvidenceItem]) -> Result<(), StoreError> {
        for item in items {
            if let Some(existing) = self.evidence.get(item.evidence_id.as_str())
                && existing != item
            {
                return Err(StoreError::Invalid(format!(
                    "evidence {} is immutable",
                    item.evidence_id
                )));
            }
        }
        Ok(())
    }

    /// Stores new items and links every item to `run_id`.
    fn link_evidence(&mut self, run_id: &RunId, items: &[EvidenceItem]) {
        for item in items {
            let id = item.evidence_id.as_str().to_string();
            self.evidence.entry(id.clone()).or_insert_with(|| item.clone());
            self.links.entry(run_id.clone()).or_default().insert(id);
        }
    }
}

/// In-memory run store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    /// Shared tables protected by a mutex.
    tables: Arc<Mutex<MemoryTables>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tables.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Store("run store mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

impl RunStore for InMemoryRunStore {
    fn insert_run(&self, record: &RunRecord, event: &RunEvent) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.runs.contains_key(&record.run_id) {
            return Err(StoreError::Conflict(format!("run {} already exists", record.run_id)));
        }
        tables.runs.insert(record.run_id.clone(), record.clone());
        tables.push_event(event);
        Ok(())
    }

    fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    fn find_run_by_token(&self, token: &LockToken) -> Result<Option<RunId>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .runs
            .values()
            .find(|record| record.lease.as_ref().is_some_and(|lease| &lease.lock_token == token))
            .map(|record| record.run_id.clone()))
    }

    fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        let mut tables = self.lock()?;
        let Some(current) = tables.runs.get(&update.run_id).cloned() else {
            return Ok(UpdateOutcome::NotFound);
        };
        if let Some(event) = &update.event
            && tables.has_event(&update.run_id, &event.action_id)
        {
            return Ok(UpdateOutcome::Duplicate(current));
        }
        let Some(next) = update.evaluate(&current) else {
            return Ok(UpdateOutcome::Mismatch(current));
        };
        tables.check_evidence(&update.evidence)?;
        tables.runs.insert(update.run_id.clone(), next.clone());
        if let Some(event) = &update.event {
            tables.push_event(event);
        }
        tables.link_evidence(&update.run_id, &update.evidence);
        Ok(UpdateOutcome::Applied(next))
    }

    fn append_event(&self, event: &RunEvent) -> Result<EventAppend, StoreError> {
        let mut tables = self.lock()?;
        if !tables.runs.contains_key(&event.run_id) {
            return Err(StoreError::Invalid(format!("unknown run {}", event.run_id)));
        }
        if tables.has_event(&event.run_id, &event.action_id) {
            return Ok(EventAppend::Duplicate);
        }
        Ok(EventAppend::Inserted(tables.push_event(event)))
    }

    fn find_event(
        &self,
        run_id: &RunId,
        action_id: &ActionId,
    ) -> Result<Option<RunEvent>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .events
            .get(run_id)
            .and_then(|events| events.iter().find(|event| &event.action_id == action_id))
            .cloned())
    }

    fn list_events(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError> {
        Ok(self.lock()?.events.get(run_id).cloned().unwrap_or_default())
    }

    fn record_evidence(&self, run_id: &RunId, items: &[EvidenceItem]) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if !tables.runs.contains_key(run_id) {
            return Err(StoreError::Invalid(format!("unknown run {run_id}")));
        }
        tables.check_evidence(items)?;
        tables.link_evidence(run_id, items);
        Ok(())
    }

    fn run_evidence(&self, run_id: &RunId) -> Result<Vec<EvidenceItem>, StoreError> {
        let tables = self.lock()?;
        let Some(ids) = tables.links.get(run_id) else {
            return Ok(Vec::new());
        };
        ids.iter()
            .map(|id| {
                tables.evidence.get(id).cloned().ok_or_else(|| {
                    StoreError::Corrupt(format!("run {run_id} links missing evidence {id}"))
                })
            })
            .collect()
    }

    fn unlink_evidence(&self, run_id: &RunId) -> Result<usize, StoreError> {
        let mut tables = self.lock()?;
        match tables.runs.get(run_id).map(|record| record.status) {
            None => return Err(StoreError::Invalid(format!("unknown run {run_id}"))),
            Some(RunStatus::Done) => {
                return Err(StoreError::Retained(format!(
                    "evidence of completed run {run_id} is retained"
                )));
            }
            Some(_) => {}
        }
        Ok(tables.links.remove(run_id).map_or(0, |ids| ids.len()))
    }

    fn load_fingerprint(&self, subject_id: &SubjectId) -> Result<Option<Fingerprint>, StoreError> {
        Ok(self.lock()?.fingerprints.get(subject_id).map(|(fingerprint, _)| fingerprint.clone()))
    }

    fn save_fingerprint(
        &self,
        subject_id: &SubjectId,
        fingerprint: &Fingerprint,
        observed_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.lock()?
            .fingerprints
            .insert(subject_id.clone(), (fingerprint.clone(), observed_at));
        Ok(())
    }
}
