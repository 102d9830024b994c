// crates/run-gate-cli/src/lib.rs
// ============================================================================
// Module: Run Gate CLI Library
// Description: Shared helpers for the Run Gate command-line interface.
// Purpose: Provide bounded input reads, clock resolution, and logging setup.
// Dependencies: run-gate-config, run-gate-core, time, tracing-subscriber
// ============================================================================

//! ## Overview
//! Helpers used by the `run-gate` binary. Inputs are untrusted: every file
//! read is size-bounded and every timestamp is parsed strictly.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod clock;
pub mod input;
pub mod logging;
