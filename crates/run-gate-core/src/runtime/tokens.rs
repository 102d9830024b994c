// crates/run-gate-core/src/runtime/tokens.rs
// ============================================================================
// Module: Run Gate Token Sources
// Description: Random and deterministic lock-token and nonce generators.
// Purpose: Supply unguessable tokens in production and stable tokens in tests.
// Dependencies: rand, std
// ============================================================================

//! ## Overview
//! [`RandomTokenSource`] draws 128 bits from the thread-local CSPRNG and
//! hex-encodes them. [`SequentialTokenSource`] yields predictable values for
//! tests and replay tooling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rand::RngCore;

use crate::core::ApprovalNonce;
use crate::core::LockToken;
use crate::core::hashing::to_hex;
use crate::interfaces::TokenSource;

// ============================================================================
// SECTION: Random Tokens
// ============================================================================

/// Token byte length before hex encoding.
const TOKEN_BYTES: usize = 16;

/// Token source backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenSource;

impl RandomTokenSource {
    /// Returns a hex string of `TOKEN_BYTES` random bytes.
    fn random_hex() -> String {
        let mut bytes = [0_u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        to_hex(&bytes)
    }
}

impl TokenSource for RandomTokenSource {
    fn lock_token(&self) -> LockToken {
        LockToken::new(Self::random_hex())
    }

    fn approval_nonce(&self) -> ApprovalNonce {
        // Nonces travel inside short callback payloads.
        let mut hex = Self::random_hex();
        hex.truncate(12);
        ApprovalNonce::new(hex)
    }
}

// ============================================================================
// SECTION: Sequential Tokens
// ============================================================================

/// Deterministic token source: `tok-1`, `tok-2`, ... and `n1`, `n2`, ...
#[derive(Debug, Default)]
pub struct SequentialTokenSource {
    /// Next counter value.
    counter: AtomicU64,
}

impl SequentialTokenSource {
    /// Creates a source starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }

    /// Returns the next counter value.
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl TokenSource for SequentialTokenSource {
    fn lock_token(&self) -> LockToken {
        LockToken::new(format!("tok-{}", self.next()))
    }

    fn approval_nonce(&self) -> ApprovalNonce {
        ApprovalNonce::new(format!("n{}", self.next()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
