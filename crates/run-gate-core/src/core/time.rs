// crates/run-gate-core/src/core/time.rs
// ============================================================================
// Module: Run Gate Time Model
// Description: Canonical timestamp representation for leases, events, and evidence.
// Purpose: Provide deterministic, replayable time values across run records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Run Gate uses explicit unix-millisecond timestamps. The core never reads
//! wall-clock time directly; hosts supply `now` to every operation, which
//! keeps lease expiry and evidence freshness deterministic under test.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds per minute.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// Nanoseconds per millisecond.
const NANOS_PER_MILLI: i128 = 1_000_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when converting timestamps to or from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// The text is not a valid RFC 3339 timestamp.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// The timestamp is outside the representable range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds supplied by the host.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads wall-clock time.
/// - Arithmetic saturates instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted forward by `millis`.
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns this timestamp shifted forward by whole minutes.
    #[must_use]
    pub const fn plus_minutes(self, minutes: u32) -> Self {
        self.plus_millis((minutes as i64).saturating_mul(MILLIS_PER_MINUTE))
    }

    /// Returns the milliseconds elapsed since `earlier` (negative when `earlier` is later).
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Formats the timestamp as RFC 3339 in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] when the value cannot be represented.
    pub fn to_rfc3339(self) -> Result<String, TimeError> {
        let nanos = i128::from(self.0) * NANOS_PER_MILLI;
        let datetime = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| TimeError::OutOfRange(err.to_string()))?;
        datetime.format(&Rfc3339).map_err(|err| TimeError::OutOfRange(err.to_string()))
    }

    /// Parses an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError`] when the text is malformed or out of range.
    pub fn parse_rfc3339(text: &str) -> Result<Self, TimeError> {
        let datetime = OffsetDateTime::parse(text.trim(), &Rfc3339)
            .map_err(|err| TimeError::Parse(err.to_string()))?;
        let millis = datetime.unix_timestamp_nanos() / NANOS_PER_MILLI;
        i64::try_from(millis).map(Self).map_err(|err| TimeError::OutOfRange(err.to_string()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::Timestamp;

    #[test]
    fn rfc3339_round_trip_keeps_millis() {
        let ts = Timestamp::parse_rfc3339("2026-03-01T10:15:30.250Z").unwrap();
        assert_eq!(ts.as_unix_millis() % 1000, 250);
        let text = ts.to_rfc3339().unwrap();
        assert!(text.starts_with("2026-03-01T10:15:30"));
        assert_eq!(Timestamp::parse_rfc3339(&text).unwrap(), ts);
    }

    #[test]
    fn plus_minutes_saturates() {
        let ts = Timestamp::from_unix_millis(i64::MAX - 1);
        assert_eq!(ts.plus_minutes(5).as_unix_millis(), i64::MAX);
        assert_eq!(Timestamp::from_unix_millis(0).plus_minutes(2).as_unix_millis(), 120_000);
    }
}
