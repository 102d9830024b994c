// crates/run-gate-cli/src/clock.rs
// ============================================================================
// Module: CLI Clock
// Description: Resolves the timestamp every command is evaluated at.
// Purpose: Keep wall-clock reads at the binary edge.
// Dependencies: run-gate-core, time
// ============================================================================

//! ## Overview
//! The core never reads wall-clock time. The CLI reads it once per command,
//! or takes an explicit `--at` RFC 3339 override for replays and tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use run_gate_core::Timestamp;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Clock resolution errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// The `--at` override is not valid RFC 3339.
    #[error("invalid --at timestamp: {0}")]
    Invalid(String),
    /// The system clock is outside the representable range.
    #[error("system clock out of range")]
    OutOfRange,
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Returns the override when present, otherwise the current UTC time.
///
/// # Errors
///
/// Returns [`ClockError`] when the override does not parse.
pub fn resolve_now(at: Option<&str>) -> Result<Timestamp, ClockError> {
    match at {
        Some(text) => {
            Timestamp::parse_rfc3339(text).map_err(|err| ClockError::Invalid(err.to_string()))
        }
        None => system_now(),
    }
}

/// Reads the system clock.
fn system_now() -> Result<Timestamp, ClockError> {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).map(Timestamp::from_unix_millis).map_err(|_| ClockError::OutOfRange)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::resolve_now;

    #[test]
    fn override_is_parsed() {
        let now = resolve_now(Some("2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(now.as_unix_millis(), 1_767_225_600_000);
    }

    #[test]
    fn malformed_override_is_rejected() {
        assert!(resolve_now(Some("yesterday")).is_err());
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(resolve_now(None).unwrap().as_unix_millis() > 0);
    }
}
