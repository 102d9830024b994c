// crates/run-gate-core/src/runtime/session.rs
// ============================================================================
// Module: Run Gate Worker Session
// Description: Explicit per-worker lease session with heartbeat accounting.
// Purpose: Replace implicit process-wide session state with an owned object.
// Dependencies: crate::{core, interfaces, runtime::lease}, serde_json, tracing
// ============================================================================

//! ## Overview
//! A [`WorkerSession`] is created once per claimed run by
//! [`WorkerSession::acquire`] and ended by [`WorkerSession::release`]. It
//! tracks consecutive heartbeat failures. Three in a row (by default) mean
//! the lock is lost: a `lock_lost` event is recorded and every later
//! authority check fails. [`WorkerSession::resume`] rebuilds a session from
//! its token for hosts that heartbeat from short-lived processes. Hosts call
//! [`WorkerSession::heartbeat`] roughly every
//! [`WorkerSession::heartbeat_interval`] (a third of the lease length).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde_json::json;
use tracing::error;
use tracing::warn;

use crate::core::ActionId;
use crate::core::LockToken;
use crate::core::MILLIS_PER_MINUTE;
use crate::core::RunEvent;
use crate::core::RunEventType;
use crate::core::RunId;
use crate::core::Timestamp;
use crate::core::WorkerId;
use crate::interfaces::RunStore;
use crate::interfaces::TokenSource;
use crate::runtime::lease::ClaimOutcome;
use crate::runtime::lease::DenyReason;
use crate::runtime::lease::LeaseError;
use crate::runtime::lease::LeaseGrant;
use crate::runtime::lease::LeaseManager;
use crate::runtime::lease::ReleaseOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consecutive heartbeat failures after which the lock is considered lost.
pub const MAX_HEARTBEAT_FAILURES: u32 = 3;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of one heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The lease was renewed.
    Renewed,
    /// The renewal failed; the session is still live.
    Missed {
        /// Failures in a row, including this one.
        consecutive_failures: u32,
    },
    /// The lock is lost; the worker must stop.
    LockLost,
}

/// Result of [`WorkerSession::acquire`].
#[derive(Debug)]
pub enum SessionStart<'m, S, T> {
    /// The lease was granted.
    Acquired(WorkerSession<'m, S, T>),
    /// The lease was denied.
    Denied(DenyReason),
}

// ============================================================================
// SECTION: Worker Session
// ============================================================================

/// Lease session owned by one worker for one run.
#[derive(Debug)]
pub struct WorkerSession<'m, S, T> {
    /// Lease manager used for renewals.
    manager: &'m LeaseManager<S, T>,
    /// Lease grant.
    grant: LeaseGrant,
    /// Consecutive heartbeat failures.
    failures: u32,
    /// Failures in a row that mean the lock is lost.
    failure_limit: u32,
    /// Whether the lock has been declared lost.
    lost: bool,
}

impl<'m, S: RunStore, T: TokenSource> WorkerSession<'m, S, T> {
    /// Claims `run_id` and opens a session on success.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn acquire(
        manager: &'m LeaseManager<S, T>,
        run_id: &RunId,
        worker_id: &WorkerId,
        lease_minutes: u32,
        persisted: Option<&LockToken>,
        now: Timestamp,
    ) -> Result<SessionStart<'m, S, T>, LeaseError> {
        Ok(match manager.claim(run_id, worker_id, lease_minutes, persisted, now)? {
            ClaimOutcome::Granted(grant) => SessionStart::Acquired(Self::open(manager, grant, 0)),
            ClaimOutcome::Denied(reason) => SessionStart::Denied(reason),
        })
    }

    /// Reopens the session holding `token` in a new process.
    ///
    /// `consecutive_failures` carries the misses the host has already seen,
    /// so lock loss is still declared after the configured number of misses
    /// in a row. Returns `None` when no run carries the token.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn resume(
        manager: &'m LeaseManager<S, T>,
        token: &LockToken,
        consecutive_failures: u32,
    ) -> Result<Option<Self>, LeaseError> {
        let store = manager.store();
        let Some(run_id) = store.find_run_by_token(token)? else {
            return Ok(None);
        };
        let Some(lease) = store
            .load_run(&run_id)?
            .and_then(|record| record.lease)
            .filter(|lease| &lease.lock_token == token)
        else {
            return Ok(None);
        };
        let grant = LeaseGrant {
            run_id,
            worker_id: lease.worker_id,
            lock_token: lease.lock_token,
            lock_expires_at: lease.lock_expires_at,
            lease_minutes: u32::try_from(lease.lease_ms / MILLIS_PER_MINUTE).unwrap_or(u32::MAX),
            reclaimed: true,
        };
        Ok(Some(Self::open(manager, grant, consecutive_failures)))
    }

    /// Builds a live session around `grant`.
    const fn open(manager: &'m LeaseManager<S, T>, grant: LeaseGrant, failures: u32) -> Self {
        Self { manager, grant, failures, failure_limit: MAX_HEARTBEAT_FAILURES, lost: false }
    }

    /// Overrides the failure limit; values below one are raised to one.
    #[must_use]
    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.failure_limit = limit.max(1);
        self
    }

    /// Returns the session token.
    #[must_use]
    pub const fn token(&self) -> &LockToken {
        &self.grant.lock_token
    }

    /// Returns the claimed run.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.grant.run_id
    }

    /// Returns the lease grant.
    #[must_use]
    pub const fn grant(&self) -> &LeaseGrant {
        &self.grant
    }

    /// Returns the recommended heartbeat cadence: a third of the lease.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.grant.lease_minutes) * 60 / 3)
    }

    /// Returns true once the lock has been declared lost.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        self.lost
    }

    /// Returns the failures in a row counted so far.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Returns the failures in a row that mean the lock is lost.
    #[must_use]
    pub const fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    /// Renews the lease, counting failures toward lock loss.
    ///
    /// Store errors count as failed renewals.
    pub fn heartbeat(&mut self, now: Timestamp) -> HeartbeatStatus {
        if self.lost {
            return HeartbeatStatus::LockLost;
        }
        let renewed = match self.manager.heartbeat(&self.grant.lock_token, now) {
            Ok(renewed) => renewed,
            Err(err) => {
                warn!(run_id = %self.grant.run_id, error = %err, "heartbeat store failure");
                false
            }
        };
        if renewed {
            self.failures = 0;
            return HeartbeatStatus::Renewed;
        }
        self.failures = self.failures.saturating_add(1);
        if self.failures < self.failure_limit {
            warn!(
                run_id = %self.grant.run_id,
                consecutive_failures = self.failures,
                "heartbeat missed"
            );
            return HeartbeatStatus::Missed { consecutive_failures: self.failures };
        }
        self.lost = true;
        self.record_lock_lost(now);
        HeartbeatStatus::LockLost
    }

    /// Fails with [`LeaseError::LockLost`] once the lock is lost.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::LockLost`] when the session no longer holds the lock.
    pub fn ensure_authority(&self) -> Result<(), LeaseError> {
        if self.lost {
            return Err(LeaseError::LockLost(self.grant.run_id.clone()));
        }
        Ok(())
    }

    /// Releases the lease and ends the session.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when the store fails.
    pub fn release(self, now: Timestamp) -> Result<ReleaseOutcome, LeaseError> {
        if self.lost {
            return Ok(ReleaseOutcome::NotHeld);
        }
        self.manager.release(&self.grant.lock_token, now)
    }

    /// Records the `lock_lost` event for this session.
    fn record_lock_lost(&self, now: Timestamp) {
        error!(run_id = %self.grant.run_id, worker_id = %self.grant.worker_id, "lock lost");
        let event = RunEvent::new(
            self.grant.run_id.clone(),
            ActionId::new(format!("lock-lost:{}", self.grant.lock_token)),
            RunEventType::LockLost,
            now,
        )
        .with_payload(json!({
            "worker_id": self.grant.worker_id,
            "consecutive_failures": self.failures,
        }));
        if let Err(err) = self.manager.store().append_event(&event) {
            warn!(run_id = %self.grant.run_id, error = %err, "lock_lost event not recorded");
        }
    }
}
