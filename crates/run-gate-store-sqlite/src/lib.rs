// crates/run-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunStore backend using SQLite WAL.
// Purpose: Persist run rows, run events, evidence, and fingerprints across workers.
// Dependencies: run-gate-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`RunStore`] implementation. Every
//! conditional update runs inside an immediate transaction, so workers in
//! separate processes that share one database file see the same atomic
//! compare-and-set semantics as the in-memory store. Run rows are stored as
//! canonical JSON with a content hash and fail closed on corruption.
//!
//! [`RunStore`]: run_gate_core::RunStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_RECORD_BYTES;
pub use store::RunSummary;
pub use store::SqliteRunStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
