// crates/run-gate-config/src/lib.rs
// ============================================================================
// Module: Run Gate Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for run-gate.toml semantics.
// Dependencies: run-gate-core, run-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `run-gate-config` defines the configuration model for Run Gate. It
//! provides strict, fail-closed validation and converts validated sections
//! into the typed policies consumed by `run-gate-core`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
