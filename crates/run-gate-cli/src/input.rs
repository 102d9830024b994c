// crates/run-gate-cli/src/input.rs
// ============================================================================
// Module: CLI Input
// Description: Size-bounded file reads for CLI JSON inputs.
// Purpose: Reject oversized or malformed evidence and context files.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Evidence sets, subject identities, and context packs are read from JSON
//! files. Reads stop one byte past the limit so oversized inputs fail closed
//! even when file metadata is unreliable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a JSON input file.
pub const MAX_INPUT_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by bounded JSON reads.
#[derive(Debug, Error)]
pub enum InputError {
    /// File I/O failure.
    #[error("failed to read {kind} from {path}: {source}")]
    Io {
        /// Input label.
        kind: String,
        /// Input path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File size exceeds the limit.
    #[error("{kind} at {path} is too large ({size} bytes > {limit} bytes)")]
    TooLarge {
        /// Input label.
        kind: String,
        /// Input path.
        path: String,
        /// Observed size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
    /// File content is not valid JSON for the expected type.
    #[error("failed to parse {kind} from {path}: {source}")]
    Parse {
        /// Input label.
        kind: String,
        /// Input path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

// ============================================================================
// SECTION: Reads
// ============================================================================

/// Reads a file from disk while enforcing a hard size limit.
///
/// # Errors
///
/// Returns [`InputError`] on I/O failure or when the file exceeds `max_bytes`.
pub fn read_bytes_with_limit(
    path: &Path,
    kind: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, InputError> {
    let io_error = |source| InputError::Io {
        kind: kind.to_string(),
        path: path.display().to_string(),
        source,
    };
    let too_large = |size| InputError::TooLarge {
        kind: kind.to_string(),
        path: path.display().to_string(),
        size,
        limit: max_bytes,
    };
    let file = File::open(path).map_err(io_error)?;
    let size = file.metadata().map_err(io_error)?.len();
    let limit = u64::try_from(max_bytes).map_err(|_| too_large(size))?;
    if size > limit {
        return Err(too_large(size));
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(io_error)?;
    if bytes.len() > max_bytes {
        return Err(too_large(u64::try_from(bytes.len()).unwrap_or(u64::MAX)));
    }
    Ok(bytes)
}

/// Reads and deserializes a JSON file with a size limit.
///
/// # Errors
///
/// Returns [`InputError`] when reading or parsing fails.
pub fn read_json<T: DeserializeOwned>(
    path: &Path,
    kind: &str,
    max_bytes: usize,
) -> Result<T, InputError> {
    let bytes = read_bytes_with_limit(path, kind, max_bytes)?;
    serde_json::from_slice(&bytes).map_err(|source| InputError::Parse {
        kind: kind.to_string(),
        path: path.display().to_string(),
        source,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
