// crates/run-gate-core/src/core/identifiers.rs
// ============================================================================
// Module: Run Gate Identifiers
// Description: Canonical opaque identifiers for runs, workers, and evidence.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every identifier in Run Gate is an opaque UTF-8 string that serializes
//! transparently. Distinct newtypes keep a lock token from being passed where
//! a run id is expected; no normalization is applied by the types themselves.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares a transparent string identifier with the shared constructor set.
macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true when the identifier is empty or whitespace only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_identifier! {
    /// Run identifier; one run per unit of coordinated work.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; uniqueness is enforced by the run store.
    RunId
}

string_identifier! {
    /// Identifier of the external subject a run works on (a product, a record).
    SubjectId
}

string_identifier! {
    /// Worker identifier presented when claiming a lease.
    WorkerId
}

string_identifier! {
    /// Opaque lock token identifying one lease grant.
    ///
    /// # Invariants
    /// - Generated by a [`crate::interfaces::TokenSource`]; never derived from the run id.
    LockToken
}

string_identifier! {
    /// Per-gate nonce binding an approval callback to one gate opening.
    ApprovalNonce
}

string_identifier! {
    /// Idempotency key for a run event.
    ///
    /// # Invariants
    /// - Unique per run; a repeated `(run_id, action_id)` pair is a duplicate.
    ActionId
}

string_identifier! {
    /// Evidence item identifier.
    ///
    /// # Invariants
    /// - Evidence items are immutable once recorded under an identifier.
    EvidenceId
}

string_identifier! {
    /// Claim type an evidence item speaks to (for example `price`).
    ClaimType
}

string_identifier! {
    /// Identifier of the data source that produced an evidence item.
    SourceId
}

string_identifier! {
    /// Identifier of a human actor signalling an approval decision.
    ActorId
}
