// crates/run-gate-core/src/runtime/approval.rs
// ============================================================================
// Module: Run Gate Approval Gate
// Description: Idempotent handling of out-of-band human decisions.
// Purpose: Turn an approval signal into at most one guarded run transition.
// Dependencies: crate::{core, interfaces, runtime}, thiserror, tracing
// ============================================================================

//! ## Overview
//! An approval signal carries the acting identity, a compact callback string
//! (`tag:code:run_id[:nonce]`), and a decision identifier supplied by the
//! transport. Handling is fail-closed:
//!
//! - unknown actors are acknowledged with [`ApprovalOutcome::Unauthorized`],
//! - malformed callbacks are acknowledged with [`ApprovalOutcome::Malformed`],
//! - a decision identifier already in the run's event log, a stale nonce, or a
//!   run that has moved on yields [`ApprovalOutcome::AlreadyDecided`].
//!
//! None of these touch the store. `unlock` only clears an expired lease and
//! never changes run status.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::core::ActionId;
use crate::core::ActorId;
use crate::core::ApprovalNonce;
use crate::core::RunId;
use crate::core::RunStatus;
use crate::core::Timestamp;
use crate::interfaces::ApprovalNotifier;
use crate::interfaces::ApprovalRequest;
use crate::interfaces::RunStore;
use crate::interfaces::TokenSource;
use crate::runtime::lease::ForceReleaseOutcome;
use crate::runtime::lease::force_release_expired;
use crate::runtime::machine::GateDecision;
use crate::runtime::machine::MachineError;
use crate::runtime::machine::RunMachine;
use crate::runtime::machine::TransitionOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default callback size limit, sized for inline button metadata.
pub const DEFAULT_MAX_CALLBACK_BYTES: usize = 64;

/// Callback field separator.
const SEPARATOR: char = ':';

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Decision encoded in a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    /// Continue the run.
    Approve,
    /// Gather fresh evidence.
    Refetch,
    /// Terminate the run.
    Abort,
    /// Clear an expired lease.
    Unlock,
}

impl ApprovalAction {
    /// Every action, in code order.
    pub const ALL: [Self; 4] = [Self::Approve, Self::Refetch, Self::Abort, Self::Unlock];

    /// Returns the one-letter callback code.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Approve => 'a',
            Self::Refetch => 'r',
            Self::Abort => 'x',
            Self::Unlock => 'u',
        }
    }

    /// Parses a callback code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| {
            let mut buf = [0_u8; 4];
            action.code().encode_utf8(&mut buf) == code
        })
    }

    /// Returns the stable action label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Refetch => "refetch",
            Self::Abort => "abort",
            Self::Unlock => "unlock",
        }
    }

    /// Returns the gate decision, or `None` for the lease-only `unlock`.
    #[must_use]
    pub const fn decision(self) -> Option<GateDecision> {
        match self {
            Self::Approve => Some(GateDecision::Approve),
            Self::Refetch => Some(GateDecision::Refetch),
            Self::Abort => Some(GateDecision::Abort),
            Self::Unlock => None,
        }
    }
}

// ============================================================================
// SECTION: Callback Encoding
// ============================================================================

/// Callback encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The encoding exceeds the size budget.
    #[error("callback exceeds {limit} bytes")]
    TooLong {
        /// Size budget in bytes.
        limit: usize,
    },
    /// The encoding does not have the expected shape.
    #[error("malformed callback: {0}")]
    Malformed(String),
    /// The source tag is not the expected one.
    #[error("unexpected callback source tag")]
    ForeignTag,
    /// The action code is unknown.
    #[error("unknown action code: {0}")]
    UnknownAction(String),
}

/// Decoded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData {
    /// Source tag identifying this deployment's buttons.
    pub source_tag: String,
    /// Encoded action.
    pub action: ApprovalAction,
    /// Target run.
    pub run_id: RunId,
    /// Gate nonce the button was issued for, when bound.
    pub nonce: Option<ApprovalNonce>,
}

impl CallbackData {
    /// Creates a callback for `action` on `run_id`.
    #[must_use]
    pub fn new(source_tag: impl Into<String>, action: ApprovalAction, run_id: RunId) -> Self {
        Self { source_tag: source_tag.into(), action, run_id, nonce: None }
    }

    /// Binds the callback to a gate nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: ApprovalNonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Builds the three decision callbacks for a gate notification.
    #[must_use]
    pub fn for_request(source_tag: &str, request: &ApprovalRequest) -> Vec<Self> {
        [ApprovalAction::Approve, ApprovalAction::Refetch, ApprovalAction::Abort]
            .into_iter()
            .map(|action| {
                Self::new(source_tag, action, request.run_id.clone())
                    .with_nonce(request.nonce.clone())
            })
            .collect()
    }

    /// Encodes as `tag:code:run_id[:nonce]`, enforcing the size budget.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when a field contains the separator or the
    /// encoding exceeds `max_bytes`.
    pub fn encode(&self, max_bytes: usize) -> Result<String, CallbackError> {
        let mut fields = vec![self.source_tag.as_str(), self.run_id.as_str()];
        if let Some(nonce) = &self.nonce {
            fields.push(nonce.as_str());
        }
        if fields.iter().any(|field| field.is_empty() || field.contains(SEPARATOR)) {
            return Err(CallbackError::Malformed("empty field or embedded separator".to_string()));
        }
        let mut encoded = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.source_tag,
            self.action.code(),
            self.run_id
        );
        if let Some(nonce) = &self.nonce {
            encoded.push(SEPARATOR);
            encoded.push_str(nonce.as_str());
        }
        if encoded.len() > max_bytes {
            return Err(CallbackError::TooLong { limit: max_bytes });
        }
        Ok(encoded)
    }

    /// Parses a callback issued under `expected_tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when the input is oversized, malformed, from
    /// another source, or carries an unknown action code.
    pub fn parse(raw: &str, expected_tag: &str, max_bytes: usize) -> Result<Self, CallbackError> {
        if raw.len() > max_bytes {
            return Err(CallbackError::TooLong { limit: max_bytes });
        }
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let (tag, code, run_id, nonce) = match parts.as_slice() {
            [tag, code, run_id] => (*tag, *code, *run_id, None),
            [tag, code, run_id, nonce] => (*tag, *code, *run_id, Some(*nonce)),
            _ => {
                return Err(CallbackError::Malformed(format!(
                    "expected 3 or 4 fields, got {}",
                    parts.len()
                )));
            }
        };
        if tag != expected_tag {
            return Err(CallbackError::ForeignTag);
        }
        let action = ApprovalAction::from_code(code)
            .ok_or_else(|| CallbackError::UnknownAction(code.to_string()))?;
        if run_id.trim().is_empty() {
            return Err(CallbackError::Malformed("empty run id".to_string()));
        }
        let nonce = match nonce {
            Some(nonce) if nonce.trim().is_empty() => {
                return Err(CallbackError::Malformed("empty nonce".to_string()));
            }
            Some(nonce) => Some(ApprovalNonce::new(nonce)),
            None => None,
        };
        Ok(Self { source_tag: tag.to_string(), action, run_id: RunId::new(run_id), nonce })
    }
}

// ============================================================================
// SECTION: Signals and Policy
// ============================================================================

/// Decision signal delivered by the approval transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSignal {
    /// Identity of the human who acted.
    pub actor_id: ActorId,
    /// Raw callback string attached to the button.
    pub callback_data: String,
    /// Transport-assigned identifier of this physical decision.
    pub decision_id: ActionId,
}

/// Who may decide, and how callbacks are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    /// Source tag expected on callbacks.
    pub source_tag: String,
    /// Actors allowed to decide.
    pub authorized_actors: BTreeSet<ActorId>,
    /// Callback size budget in bytes.
    pub max_callback_bytes: usize,
}

impl ApprovalPolicy {
    /// Creates a policy with no authorized actors.
    #[must_use]
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            authorized_actors: BTreeSet::new(),
            max_callback_bytes: DEFAULT_MAX_CALLBACK_BYTES,
        }
    }

    /// Authorizes an actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<ActorId>) -> Self {
        self.authorized_actors.insert(actor_id.into());
        self
    }

    /// Sets the callback size budget.
    #[must_use]
    pub const fn with_max_callback_bytes(mut self, max_bytes: usize) -> Self {
        self.max_callback_bytes = max_bytes;
        self
    }

    /// Returns true when `actor_id` may decide.
    #[must_use]
    pub fn is_authorized(&self, actor_id: &ActorId) -> bool {
        self.authorized_actors.contains(actor_id)
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Result of handling one approval signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// The decision was applied.
    Applied {
        /// Decision applied.
        action: ApprovalAction,
        /// Target run.
        run_id: RunId,
        /// Status entered.
        status: RunStatus,
    },
    /// The gate was already decided; nothing changed.
    AlreadyDecided {
        /// Target run.
        run_id: RunId,
        /// Current status.
        status: RunStatus,
    },
    /// The actor is not on the allow-list; nothing changed.
    Unauthorized {
        /// Rejected actor.
        actor_id: ActorId,
    },
    /// The callback could not be decoded; nothing changed.
    Malformed {
        /// Decoding failure.
        reason: String,
    },
    /// The callback names an unknown run.
    RunNotFound {
        /// Run named by the callback.
        run_id: RunId,
    },
    /// An expired lease was cleared.
    Unlocked {
        /// Target run.
        run_id: RunId,
    },
    /// The lease could not be cleared.
    UnlockRefused {
        /// Target run.
        run_id: RunId,
        /// Refusal reason.
        reason: String,
    },
}

// ============================================================================
// SECTION: Approval Gate
// ============================================================================

/// Approval handler bound to a run machine.
#[derive(Debug)]
pub struct ApprovalGate<'m, S, N, T> {
    /// State machine decisions are applied through.
    machine: &'m RunMachine<S, N, T>,
    /// Allow-list and encoding rules.
    policy: ApprovalPolicy,
}

impl<'m, S, N, T> ApprovalGate<'m, S, N, T>
where
    S: RunStore,
    N: ApprovalNotifier,
    T: TokenSource,
{
    /// Creates an approval gate.
    #[must_use]
    pub const fn new(machine: &'m RunMachine<S, N, T>, policy: ApprovalPolicy) -> Self {
        Self { machine, policy }
    }

    /// Returns the approval policy.
    #[must_use]
    pub const fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Handles one approval signal.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the store fails; every rejection
    /// is a typed [`ApprovalOutcome`].
    pub fn handle(
        &self,
        signal: &ApprovalSignal,
        now: Timestamp,
    ) -> Result<ApprovalOutcome, MachineError> {
        if !self.policy.is_authorized(&signal.actor_id) {
            warn!(actor_id = %signal.actor_id, "unauthorized approval signal ignored");
            return Ok(ApprovalOutcome::Unauthorized { actor_id: signal.actor_id.clone() });
        }
        let callback = match CallbackData::parse(
            &signal.callback_data,
            &self.policy.source_tag,
            self.policy.max_callback_bytes,
        ) {
            Ok(callback) => callback,
            Err(err) => {
                warn!(
                    actor_id = %signal.actor_id,
                    error = %err,
                    "malformed approval signal ignored"
                );
                return Ok(ApprovalOutcome::Malformed { reason: err.to_string() });
            }
        };

        let run_id = callback.run_id.clone();
        let store = self.machine.store();
        let Some(record) = store.load_run(&run_id)? else {
            warn!(run_id = %run_id, "approval signal for unknown run");
            return Ok(ApprovalOutcome::RunNotFound { run_id });
        };
        if store.find_event(&run_id, &signal.decision_id)?.is_some() {
            info!(run_id = %run_id, decision_id = %signal.decision_id, "approval redelivered");
            return Ok(ApprovalOutcome::AlreadyDecided { run_id, status: record.status });
        }

        let Some(decision) = callback.action.decision() else {
            return self.unlock(&run_id, record.status, signal, now);
        };
        let outcome = self.machine.decide(
            &run_id,
            decision,
            &signal.decision_id,
            callback.nonce.as_ref(),
            &signal.actor_id,
            now,
        );
        match outcome {
            Ok(TransitionOutcome::Applied(record)) => {
                info!(
                    run_id = %run_id,
                    actor_id = %signal.actor_id,
                    action = callback.action.as_str(),
                    "approval applied"
                );
                Ok(ApprovalOutcome::Applied {
                    action: callback.action,
                    run_id,
                    status: record.status,
                })
            }
            Ok(TransitionOutcome::AlreadyApplied(record)) => {
                Ok(ApprovalOutcome::AlreadyDecided { run_id, status: record.status })
            }
            Ok(TransitionOutcome::NotApplied { current }) => {
                info!(run_id = %run_id, status = current.as_str(), "approval already decided");
                Ok(ApprovalOutcome::AlreadyDecided { run_id, status: current })
            }
            Err(MachineError::RunNotFound(run_id)) => Ok(ApprovalOutcome::RunNotFound { run_id }),
            Err(err) => Err(err),
        }
    }

    /// Clears an expired lease on behalf of an operator.
    fn unlock(
        &self,
        run_id: &RunId,
        status: RunStatus,
        signal: &ApprovalSignal,
        now: Timestamp,
    ) -> Result<ApprovalOutcome, MachineError> {
        let outcome = force_release_expired(
            self.machine.store(),
            run_id,
            Some(signal.decision_id.clone()),
            signal.actor_id.as_str(),
            now,
        )?;
        let run_id = run_id.clone();
        Ok(match outcome {
            ForceReleaseOutcome::Released { previous_worker } => {
                info!(
                    run_id = %run_id,
                    actor_id = %signal.actor_id,
                    previous_worker = %previous_worker,
                    "expired lease unlocked"
                );
                ApprovalOutcome::Unlocked { run_id }
            }
            ForceReleaseOutcome::AlreadyRecorded => {
                ApprovalOutcome::AlreadyDecided { run_id, status }
            }
            ForceReleaseOutcome::LeaseActive { worker_id, lock_expires_at } => {
                ApprovalOutcome::UnlockRefused {
                    run_id,
                    reason: format!("lease held by {worker_id} until {lock_expires_at}"),
                }
            }
            ForceReleaseOutcome::NoLease => {
                ApprovalOutcome::UnlockRefused { run_id, reason: "no lease to unlock".to_string() }
            }
            ForceReleaseOutcome::RunNotFound => ApprovalOutcome::RunNotFound { run_id },
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::ApprovalAction;
    use super::CallbackData;
    use super::CallbackError;
    use crate::core::RunId;

    #[test]
    fn callback_encodes_and_parses_with_nonce() {
        let callback = CallbackData::new("rg", ApprovalAction::Refetch, RunId::new("run-7"))
            .with_nonce("n1".into());
        let encoded = callback.encode(64).unwrap();
        assert_eq!(encoded, "rg:r:run-7:n1");
        assert_eq!(CallbackData::parse(&encoded, "rg", 64).unwrap(), callback);
    }

    #[test]
    fn parse_rejects_foreign_tag_and_unknown_code() {
        assert_eq!(CallbackData::parse("zz:a:run-1", "rg", 64), Err(CallbackError::ForeignTag));
        assert!(matches!(
            CallbackData::parse("rg:q:run-1", "rg", 64),
            Err(CallbackError::UnknownAction(_))
        ));
        assert!(matches!(CallbackData::parse("rg:a", "rg", 64), Err(CallbackError::Malformed(_))));
        let blank = CallbackData::parse("rg:a: ", "rg", 64);
        assert!(matches!(blank, Err(CallbackError::Malformed(_))));
    }

    #[test]
    fn size_budget_is_enforced() {
        let long = format!("rg:a:{}", "r".repeat(80));
        assert_eq!(CallbackData::parse(&long, "rg", 64), Err(CallbackError::TooLong { limit: 64 }));
        let callback = CallbackData::new("rg", ApprovalAction::Approve, RunId::new("r".repeat(80)));
        assert_eq!(callback.encode(64), Err(CallbackError::TooLong { limit: 64 }));
    }
}
