// crates/run-gate-core/src/runtime/lease.rs
// ============================================================================
// Module: Run Gate Lease Manager
// Description: Claim, heartbeat, release, and force-release of run leases.
// Purpose: Guarantee at most one worker acts on a run at a time.
// Dependencies: crate::{core, interfaces}, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! A lease is a set of fields on the run row. Every lease mutation is a
//! conditional update:
//!
//! - `claim` succeeds when the lease is free (absent or expired), or when the
//!   same worker presents the token it already holds (crash-safe resume).
//! - `heartbeat` renews by the original lease length only while the
//!   presented token still holds an unexpired lease.
//! - `release` clears the lease held by a token.
//! - `force_release` clears a lease only once it has expired; an active lease
//!   is never broken.
//!
//! Requested lease lengths are clamped to [`LeaseBounds`]. Leases stay valid
//! while a run waits for approval, so a worker keeps ownership across a
//! slow human decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;
use thiserror::Error;
use tracing::debug;
use tracing::info;

use crate::core::ActionId;
use crate::core::ConditionalUpdate;
use crate::core::Lease;
use crate::core::LeaseChange;
use crate::core::LockToken;
use crate::core::MILLIS_PER_MINUTE;
use crate::core::RunEvent;
use crate::core::RunEventType;
use crate::core::RunId;
use crate::core::RunRecord;
use crate::core::RunStatus;
use crate::core::RunUpdate;
use crate::core::Timestamp;
use crate::core::UpdateGuard;
use crate::core::UpdateOutcome;
use crate::core::WorkerId;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;
use crate::interfaces::TokenSource;

// ============================================================================
// SECTION: Bounds
// ============================================================================

/// Shortest allowed lease, in minutes.
pub const MIN_LEASE_MINUTES: u32 = 1;

/// Longest allowed lease, in minutes.
pub const MAX_LEASE_MINUTES: u32 = 30;

/// Inclusive bounds applied to requested lease lengths.
///
/// # Invariants
/// - `MIN_LEASE_MINUTES <= min_minutes <= max_minutes <= MAX_LEASE_MINUTES`
///   when built through [`LeaseBounds::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseBounds {
    /// Shortest lease granted.
    min_minutes: u32,
    /// Longest lease granted.
    max_minutes: u32,
}

impl LeaseBounds {
    /// Creates bounds, narrowing them into `MIN_LEASE_MINUTES..=MAX_LEASE_MINUTES`.
    #[must_use]
    pub fn new(min_minutes: u32, max_minutes: u32) -> Self {
        let min_minutes = min_minutes.clamp(MIN_LEASE_MINUTES, MAX_LEASE_MINUTES);
        let max_minutes = max_minutes.clamp(min_minutes, MAX_LEASE_MINUTES);
        Self { min_minutes, max_minutes }
    }

    /// Clamps a requested lease length.
    #[must_use]
    pub fn clamp(&self, requested_minutes: u32) -> u32 {
        requested_minutes.clamp(self.min_minutes, self.max_minutes)
    }

    /// Returns the shortest lease granted.
    #[must_use]
    pub const fn min_minutes(&self) -> u32 {
        self.min_minutes
    }

    /// Returns the longest lease granted.
    #[must_use]
    pub const fn max_minutes(&self) -> u32 {
        self.max_minutes
    }
}

impl Default for LeaseBounds {
    fn default() -> Self {
        Self { min_minutes: MIN_LEASE_MINUTES, max_minutes: MAX_LEASE_MINUTES }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Claimed run.
    pub run_id: RunId,
    /// Claiming worker.
    pub worker_id: WorkerId,
    /// Token for this claim session.
    pub lock_token: LockToken,
    /// Lease expiry.
    pub lock_expires_at: Timestamp,
    /// Granted length after clamping.
    pub lease_minutes: u32,
    /// Whether the worker resumed a lease it already held.
    pub reclaimed: bool,
}

/// Why a claim was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Another session holds an unexpired lease.
    Held {
        /// Holding worker.
        worker_id: WorkerId,
        /// When the lease lapses.
        lock_expires_at: Timestamp,
    },
    /// The run is already terminal.
    Terminal(RunStatus),
    /// No such run.
    RunNotFound,
}

/// Claim result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The lease was granted.
    Granted(LeaseGrant),
    /// The lease was denied.
    Denied(DenyReason),
}

impl ClaimOutcome {
    /// Returns the granted token, when any.
    #[must_use]
    pub const fn token(&self) -> Option<&LockToken> {
        match self {
            Self::Granted(grant) => Some(&grant.lock_token),
            Self::Denied(_) => None,
        }
    }
}

/// Release result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was cleared.
    Released(RunId),
    /// The token holds no active lease.
    NotHeld,
}

/// Force-release result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceReleaseOutcome {
    /// The expired lease was cleared.
    Released {
        /// Worker that held the expired lease.
        previous_worker: WorkerId,
    },
    /// The lease is still active and was left alone.
    LeaseActive {
        /// Holding worker.
        worker_id: WorkerId,
        /// When the lease lapses.
        lock_expires_at: Timestamp,
    },
    /// The run carries no lease.
    NoLease,
    /// The same force-release action was already recorded.
    AlreadyRecorded,
    /// No such run.
    RunNotFound,
}

/// Lease view for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseStatus {
    /// Run status.
    pub status: RunStatus,
    /// Lease fields, when present.
    pub lease: Option<Lease>,
    /// Whether the lease is unexpired at the query time.
    pub held: bool,
}

/// Lease manager errors.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The presented token no longer holds the lease.
    #[error("lock lost for run {0}")]
    LockLost(RunId),
}

// ============================================================================
// SECTION: Lease Manager
// ============================================================================

/// Lease manager over a run store.
#[derive(Debug, Clone)]
pub struct LeaseManager<S, T> {
    /// Backing store.
    store: S,
    /// Token generator.
    tokens: T,
    /// Allowed lease lengths.
    bounds: LeaseBounds,
}

impl<S: RunStore, T: TokenSource> LeaseManager<S, T> {
    /// Creates a lease manager.
    #[must_use]
    pub const fn new(store: S, tokens: T, bounds: LeaseBounds) -> Self {
        Self { store, tokens, bounds }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the configured bounds.
    #[must_use]
    pub const fn bounds(&self) -> LeaseBounds {
        self.bounds
    }

    /// Claims the lease on `run_id` for `worker_id`.
    ///
    /// Presenting the token of a lease the worker still holds resumes it under
    /// the same token and renews its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn claim(
        &self,
        run_id: &RunId,
        worker_id: &WorkerId,
        lease_minutes: u32,
        presented: Option<&LockToken>,
        now: Timestamp,
    ) -> Result<ClaimOutcome, LeaseError> {
        let minutes = self.bounds.clamp(lease_minutes);
        let Some(record) = self.store.load_run(run_id)? else {
            return Ok(ClaimOutcome::Denied(DenyReason::RunNotFound));
        };
        if record.status.is_terminal() {
            return Ok(ClaimOutcome::Denied(DenyReason::Terminal(record.status)));
        }
        let resumed = presented.and_then(|token| {
            record
                .active_lease(now)
                .filter(|lease| &lease.worker_id == worker_id && &lease.lock_token == token)
        });
        if resumed.is_none()
            && let Some(reason) = deny_reason(&record, now)
        {
            debug!(run_id = %run_id, worker_id = %worker_id, "lease claim denied");
            return Ok(ClaimOutcome::Denied(reason));
        }

        let reclaimed = resumed.is_some();
        let lock_token = match resumed {
            Some(lease) => lease.lock_token.clone(),
            None => self.tokens.lock_token(),
        };
        let locked_at = resumed.map_or(now, |lease| lease.locked_at);
        let lease_ms = i64::from(minutes) * MILLIS_PER_MINUTE;
        let lease = Lease {
            worker_id: worker_id.clone(),
            lock_token: lock_token.clone(),
            locked_at,
            lock_expires_at: now.plus_millis(lease_ms),
            lease_ms,
        };
        let guards = vec![
            UpdateGuard::NotTerminal,
            UpdateGuard::LeaseClaimable {
                worker_id: worker_id.clone(),
                token: reclaimed.then(|| lock_token.clone()),
                now,
            },
        ];
        let event = RunEvent::new(
            run_id.clone(),
            ActionId::new(format!("lease-claim:{lock_token}:{}", record.revision + 1)),
            RunEventType::LeaseClaimed,
            now,
        )
        .with_payload(json!({
            "worker_id": worker_id,
            "lease_minutes": minutes,
            "lock_expires_at": lease.lock_expires_at,
            "reclaimed": reclaimed,
        }));
        let update = ConditionalUpdate::new(
            run_id.clone(),
            guards,
            RunUpdate::new(now).lease(LeaseChange::Set(lease.clone())),
        )
        .with_event(event);

        match self.store.conditional_update(&update)? {
            UpdateOutcome::Applied(_) => {
                info!(
                    run_id = %run_id,
                    worker_id = %worker_id,
                    lease_minutes = minutes,
                    reclaimed,
                    "lease granted"
                );
                Ok(ClaimOutcome::Granted(LeaseGrant {
                    run_id: run_id.clone(),
                    worker_id: worker_id.clone(),
                    lock_token,
                    lock_expires_at: lease.lock_expires_at,
                    lease_minutes: minutes,
                    reclaimed,
                }))
            }
            UpdateOutcome::Mismatch(current) | UpdateOutcome::Duplicate(current) => {
                let reason = if current.status.is_terminal() {
                    DenyReason::Terminal(current.status)
                } else {
                    deny_reason(&current, now).unwrap_or(DenyReason::RunNotFound)
                };
                debug!(run_id = %run_id, worker_id = %worker_id, "lease claim lost a race");
                Ok(ClaimOutcome::Denied(reason))
            }
            UpdateOutcome::NotFound => Ok(ClaimOutcome::Denied(DenyReason::RunNotFound)),
        }
    }

    /// Renews the lease held by `token` by its original length.
    ///
    /// Returns `false` when the token no longer holds an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn heartbeat(&self, token: &LockToken, now: Timestamp) -> Result<bool, LeaseError> {
        let Some(run_id) = self.store.find_run_by_token(token)? else {
            return Ok(false);
        };
        let Some(record) = self.store.load_run(&run_id)? else {
            return Ok(false);
        };
        let Some(lease) = record.lease.as_ref().filter(|lease| lease.is_held_by(token, now)) else {
            return Ok(false);
        };
        let lock_expires_at = now.plus_millis(lease.lease_ms);
        let update = ConditionalUpdate::new(
            run_id.clone(),
            vec![UpdateGuard::LeaseHeldBy { token: token.clone(), now }],
            RunUpdate::new(now).lease(LeaseChange::Renew { lock_expires_at }),
        );
        let renewed = matches!(self.store.conditional_update(&update)?, UpdateOutcome::Applied(_));
        debug!(run_id = %run_id, renewed, "lease heartbeat");
        Ok(renewed)
    }

    /// Clears the lease held by `token`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn release(&self, token: &LockToken, now: Timestamp) -> Result<ReleaseOutcome, LeaseError> {
        let Some(run_id) = self.store.find_run_by_token(token)? else {
            return Ok(ReleaseOutcome::NotHeld);
        };
        let event = RunEvent::new(
            run_id.clone(),
            ActionId::new(format!("lease-release:{token}")),
            RunEventType::LeaseReleased,
            now,
        );
        let update = ConditionalUpdate::new(
            run_id.clone(),
            vec![UpdateGuard::LeaseHeldBy { token: token.clone(), now }],
            RunUpdate::new(now).lease(LeaseChange::Clear),
        )
        .with_event(event);
        match self.store.conditional_update(&update)? {
            UpdateOutcome::Applied(_) => {
                info!(run_id = %run_id, "lease released");
                Ok(ReleaseOutcome::Released(run_id))
            }
            _ => Ok(ReleaseOutcome::NotHeld),
        }
    }

    /// Clears the lease on `run_id` only if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn force_release(
        &self,
        run_id: &RunId,
        now: Timestamp,
    ) -> Result<ForceReleaseOutcome, LeaseError> {
        Ok(force_release_expired(&self.store, run_id, None, "operator", now)?)
    }

    /// Returns the lease view of `run_id` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn lease_status(
        &self,
        run_id: &RunId,
        now: Timestamp,
    ) -> Result<Option<LeaseStatus>, LeaseError> {
        Ok(self.store.load_run(run_id)?.map(|record| LeaseStatus {
            status: record.status,
            held: record.active_lease(now).is_some(),
            lease: record.lease,
        }))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns why `record` cannot be claimed at `now`, or `None` when it is free.
fn deny_reason(record: &RunRecord, now: Timestamp) -> Option<DenyReason> {
    record.active_lease(now).map(|lease| DenyReason::Held {
        worker_id: lease.worker_id.clone(),
        lock_expires_at: lease.lock_expires_at,
    })
}

/// Clears an expired lease, recording a `lease_unlocked` event.
///
/// The default action id is derived from the expired token, so repeating the
/// same force-release is reported as [`ForceReleaseOutcome::AlreadyRecorded`].
pub(crate) fn force_release_expired<S: RunStore + ?Sized>(
    store: &S,
    run_id: &RunId,
    action_id: Option<ActionId>,
    initiator: &str,
    now: Timestamp,
) -> Result<ForceReleaseOutcome, StoreError> {
    let Some(record) = store.load_run(run_id)? else {
        return Ok(ForceReleaseOutcome::RunNotFound);
    };
    let Some(lease) = record.lease else {
        return Ok(ForceReleaseOutcome::NoLease);
    };
    if !lease.is_expired(now) {
        return Ok(ForceReleaseOutcome::LeaseActive {
            worker_id: lease.worker_id,
            lock_expires_at: lease.lock_expires_at,
        });
    }
    let action_id =
        action_id.unwrap_or_else(|| ActionId::new(format!("lease-unlock:{}", lease.lock_token)));
    let event = RunEvent::new(run_id.clone(), action_id, RunEventType::LeaseUnlocked, now)
        .with_payload(json!({
            "previous_worker": lease.worker_id,
            "expired_at": lease.lock_expires_at,
            "initiator": initiator,
        }));
    let update = ConditionalUpdate::new(
        run_id.clone(),
        vec![UpdateGuard::LeaseExpired { now }],
        RunUpdate::new(now).lease(LeaseChange::Clear),
    )
    .with_event(event);

    Ok(match store.conditional_update(&update)? {
        UpdateOutcome::Applied(_) => {
            info!(
                run_id = %run_id,
                previous_worker = %lease.worker_id,
                initiator,
                "expired lease cleared"
            );
            ForceReleaseOutcome::Released { previous_worker: lease.worker_id }
        }
        UpdateOutcome::Duplicate(_) => ForceReleaseOutcome::AlreadyRecorded,
        UpdateOutcome::Mismatch(current) => match current.lease {
            Some(active) => ForceReleaseOutcome::LeaseActive {
                worker_id: active.worker_id,
                lock_expires_at: active.lock_expires_at,
            },
            None => ForceReleaseOutcome::NoLease,
        },
        UpdateOutcome::NotFound => ForceReleaseOutcome::RunNotFound,
    })
}
