// crates/run-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunStore backed by SQLite WAL.
// Purpose: Persist run rows and their event log with atomic guarded updates.
// Dependencies: run-gate-core, rusqlite, serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! This module implements a durable [`RunStore`] using `SQLite`. Run rows are
//! stored as canonical JSON plus a content hash, with the status and lease
//! token projected into columns for lookups. Loads verify the hash and fail
//! closed on corruption.
//!
//! Every mutation runs in a `BEGIN IMMEDIATE` transaction: the reserved write
//! lock is taken before the row is read, so the duplicate check, the guard
//! check, the row write, and the event insert observe and produce one
//! consistent state even when several processes share the database file.
//! `run_events` carries `UNIQUE (run_id, action_id)` as the final backstop for
//! idempotency.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use run_gate_core::ActionId;
use run_gate_core::ConditionalUpdate;
use run_gate_core::EventAppend;
use run_gate_core::EvidenceItem;
use run_gate_core::Fingerprint;
use run_gate_core::ContentDigest;
use run_gate_core::HashAlgorithm;
use run_gate_core::LockToken;
use run_gate_core::RunEvent;
use run_gate_core::RunId;
use run_gate_core::RunRecord;
use run_gate_core::RunStatus;
use run_gate_core::RunStore;
use run_gate_core::StoreError;
use run_gate_core::SubjectId;
use run_gate_core::Timestamp;
use run_gate_core::UpdateOutcome;
use run_gate_core::hashing::DEFAULT_HASH_ALGORITHM;
use run_gate_core::hashing::canonical_bytes;
use run_gate_core::hashing::digest_bytes;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum canonical run row size accepted by the store.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` run store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw run rows or evidence payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// A row with the same identity already exists.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// The data is retained and may not be removed.
    #[error("sqlite store retention: {0}")]
    Retained(String),
    /// Store payload exceeded size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Retained(message) => Self::Retained(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "record_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps an engine error into a store error.
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed run store with WAL support.
///
/// # Invariants
/// - Run row loads verify stored hashes before deserialization.
/// - `SQLite` connection access is serialized through a mutex.
#[derive(Clone)]
pub struct SqliteRunStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

/// Summary row for run listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Subject the run works on.
    pub subject_id: Option<SubjectId>,
    /// Last update time.
    pub updated_at: Timestamp,
}

impl SqliteRunStore {
    /// Opens an `SQLite`-backed run store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        debug!(path = %config.path.display(), "sqlite run store opened");
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Lists runs ordered by run id, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails or a row is invalid.
    pub fn list_runs(
        &self,
        status: Option<RunStatus>,
    ) -> Result<Vec<RunSummary>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT run_id, status, subject_id, updated_at FROM runs WHERE ?1 IS NULL OR \
                 status = ?1 ORDER BY run_id",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![status.map(RunStatus::as_str)], |row| {
                let run_id: String = row.get(0)?;
                let status: String = row.get(1)?;
                let subject_id: Option<String> = row.get(2)?;
                let updated_at: i64 = row.get(3)?;
                Ok((run_id, status, subject_id, updated_at))
            })
            .map_err(db_error)?;
        let mut summaries = Vec::new();
        for row in rows {
            let (run_id, status, subject_id, updated_at) = row.map_err(db_error)?;
            summaries.push(RunSummary {
                status: parse_label(&status, "status")?,
                run_id: RunId::new(run_id),
                subject_id: subject_id.map(SubjectId::new),
                updated_at: Timestamp::from_unix_millis(updated_at),
            });
        }
        Ok(summaries)
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Runs `body` inside an immediate transaction, committing on success.
    fn write<R>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> Result<R, SqliteStoreError>,
    ) -> Result<R, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
        let result = body(&tx)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(result)
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

impl RunStore for SqliteRunStore {
    fn insert_run(&self, record: &RunRecord, event: &RunEvent) -> Result<(), StoreError> {
        let prepared = PreparedRecord::new(record)?;
        self.write(|tx| {
            if run_exists(tx, &record.run_id)? {
                return Err(SqliteStoreError::Conflict(format!(
                    "run {} already exists",
                    record.run_id
                )));
            }
            insert_record(tx, record, &prepared)?;
            insert_event(tx, event)?;
            Ok(())
        })?;
        Ok(())
    }

    fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(load_record(&guard, run_id)?)
    }

    fn find_run_by_token(&self, token: &LockToken) -> Result<Option<RunId>, StoreError> {
        let guard = self.lock()?;
        let run_id: Option<String> = guard
            .query_row(
                "SELECT run_id FROM runs WHERE lock_token = ?1",
                params![token.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        Ok(run_id.map(RunId::new))
    }

    fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        let encoded = encode_evidence(&update.evidence)?;
        let outcome = self.write(|tx| {
            let Some(current) = load_record(tx, &update.run_id)? else {
                return Ok(UpdateOutcome::NotFound);
            };
            if let Some(event) = &update.event
                && event_exists(tx, &update.run_id, &event.action_id)?
            {
                return Ok(UpdateOutcome::Duplicate(current));
            }
            let Some(next) = update.evaluate(&current) else {
                return Ok(UpdateOutcome::Mismatch(current));
            };
            let prepared = PreparedRecord::new(&next)?;
            replace_record(tx, &next, &prepared, current.revision)?;
            if let Some(event) = &update.event {
                insert_event(tx, event)?;
            }
            link_evidence(tx, &update.run_id, &encoded)?;
            Ok(UpdateOutcome::Applied(next))
        })?;
        Ok(outcome)
    }

    fn append_event(&self, event: &RunEvent) -> Result<EventAppend, StoreError> {
        let outcome = self.write(|tx| {
            if !run_exists(tx, &event.run_id)? {
                return Err(SqliteStoreError::Invalid(format!("unknown run {}", event.run_id)));
            }
            if event_exists(tx, &event.run_id, &event.action_id)? {
                return Ok(EventAppend::Duplicate);
            }
            Ok(EventAppend::Inserted(insert_event(tx, event)?))
        })?;
        Ok(outcome)
    }

    fn find_event(
        &self,
        run_id: &RunId,
        action_id: &ActionId,
    ) -> Result<Option<RunEvent>, StoreError> {
        let guard = self.lock()?;
        let row: Option<(i64, String)> = guard
            .query_row(
                "SELECT seq, event_json FROM run_events WHERE run_id = ?1 AND action_id = ?2",
                params![run_id.as_str(), action_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_error)?;
        Ok(row.map(|(seq, json)| decode_event(seq, &json)).transpose()?)
    }

    fn list_events(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT seq, event_json FROM run_events WHERE run_id = ?1 ORDER BY seq")
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| {
                let seq: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((seq, json))
            })
            .map_err(db_error)?;
        let mut events = Vec::new();
        for row in rows {
            let (seq, json) = row.map_err(db_error)?;
            events.push(decode_event(seq, &json)?);
        }
        Ok(events)
    }

    fn record_evidence(&self, run_id: &RunId, items: &[EvidenceItem]) -> Result<(), StoreError> {
        let encoded = encode_evidence(items)?;
        self.write(|tx| {
            if !run_exists(tx, run_id)? {
                return Err(SqliteStoreError::Invalid(format!("unknown run {run_id}")));
            }
            link_evidence(tx, run_id, &encoded)
        })?;
        Ok(())
    }

    fn run_evidence(&self, run_id: &RunId) -> Result<Vec<EvidenceItem>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT e.item_json FROM run_evidence l JOIN evidence_items e ON e.evidence_id = \
                 l.evidence_id WHERE l.run_id = ?1 ORDER BY l.evidence_id",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(db_error)?;
        let mut items = Vec::new();
        for row in rows {
            let json = row.map_err(db_error)?;
            items.push(decode_json::<EvidenceItem>(json.as_bytes(), "evidence item")?);
        }
        Ok(items)
    }

    fn unlink_evidence(&self, run_id: &RunId) -> Result<usize, StoreError> {
        let removed = self.write(|tx| {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM runs WHERE run_id = ?1",
                    params![run_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            match status.as_deref() {
                None => return Err(SqliteStoreError::Invalid(format!("unknown run {run_id}"))),
                Some(label) if label == RunStatus::Done.as_str() => {
                    return Err(SqliteStoreError::Retained(format!(
                        "evidence of completed run {run_id} is retained"
                    )));
                }
                Some(_) => {}
            }
            tx.execute("DELETE FROM run_evidence WHERE run_id = ?1", params![run_id.as_str()])
                .map_err(db_error)
        })?;
        Ok(removed)
    }

    fn load_fingerprint(&self, subject_id: &SubjectId) -> Result<Option<Fingerprint>, StoreError> {
        let guard = self.lock()?;
        let json: Option<String> = guard
            .query_row(
                "SELECT fingerprint_json FROM subject_fingerprints WHERE subject_id = ?1",
                params![subject_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        Ok(json.map(|json| decode_json(json.as_bytes(), "fingerprint")).transpose()?)
    }

    fn save_fingerprint(
        &self,
        subject_id: &SubjectId,
        fingerprint: &Fingerprint,
        observed_at: Timestamp,
    ) -> Result<(), StoreError> {
        let json = canonical_text(fingerprint)?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO subject_fingerprints (subject_id, fingerprint_json, observed_at) \
                 VALUES (?1, ?2, ?3) ON CONFLICT(subject_id) DO UPDATE SET fingerprint_json = \
                 excluded.fingerprint_json, observed_at = excluded.observed_at",
                params![subject_id.as_str(), json, observed_at.as_unix_millis()],
            )
            .map_err(db_error)?;
            Ok(())
        })?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Row Encoding
// ============================================================================

/// Canonical run row bytes and their digest.
struct PreparedRecord {
    /// Canonical JSON bytes.
    bytes: Vec<u8>,
    /// Lowercase hex digest of `bytes`.
    hash: String,
    /// Digest algorithm label.
    algorithm: &'static str,
}

impl PreparedRecord {
    /// Canonicalizes and hashes `record`, enforcing the size limit.
    fn new(record: &RunRecord) -> Result<Self, SqliteStoreError> {
        let bytes = canonical_bytes(record)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if bytes.len() > MAX_RECORD_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_RECORD_BYTES,
                actual_bytes: bytes.len(),
            });
        }
        let digest = digest_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        Ok(Self { bytes, hash: digest.hex, algorithm: digest.algorithm.as_str() })
    }
}

/// Returns true when the run row exists.
fn run_exists(connection: &Connection, run_id: &RunId) -> Result<bool, SqliteStoreError> {
    connection
        .query_row("SELECT 1 FROM runs WHERE run_id = ?1", params![run_id.as_str()], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
        .map_err(db_error)
}

/// Inserts a new run row.
fn insert_record(
    tx: &Transaction<'_>,
    record: &RunRecord,
    prepared: &PreparedRecord,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO runs (run_id, status, subject_id, lock_token, revision, record_json, \
         record_hash, hash_algorithm, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.run_id.as_str(),
            record.status.as_str(),
            record.subject_id.as_ref().map(SubjectId::as_str),
            record.lease.as_ref().map(|lease| lease.lock_token.as_str()),
            to_sql_int(record.revision, "revision")?,
            prepared.bytes,
            prepared.hash,
            prepared.algorithm,
            record.updated_at.as_unix_millis(),
        ],
    )
    .map_err(db_error)?;
    Ok(())
}

/// Replaces a run row, requiring the stored revision to still be `expected_revision`.
fn replace_record(
    tx: &Transaction<'_>,
    record: &RunRecord,
    prepared: &PreparedRecord,
    expected_revision: u64,
) -> Result<(), SqliteStoreError> {
    let changed = tx
        .execute(
            "UPDATE runs SET status = ?2, subject_id = ?3, lock_token = ?4, revision = ?5, \
             record_json = ?6, record_hash = ?7, hash_algorithm = ?8, updated_at = ?9 WHERE \
             run_id = ?1 AND revision = ?10",
            params![
                record.run_id.as_str(),
                record.status.as_str(),
                record.subject_id.as_ref().map(SubjectId::as_str),
                record.lease.as_ref().map(|lease| lease.lock_token.as_str()),
                to_sql_int(record.revision, "revision")?,
                prepared.bytes,
                prepared.hash,
                prepared.algorithm,
                record.updated_at.as_unix_millis(),
                to_sql_int(expected_revision, "revision")?,
            ],
        )
        .map_err(db_error)?;
    if changed != 1 {
        return Err(SqliteStoreError::Conflict(format!(
            "run {} changed during update",
            record.run_id
        )));
    }
    Ok(())
}

/// Loads and verifies a run row.
fn load_record(
    connection: &Connection,
    run_id: &RunId,
) -> Result<Option<RunRecord>, SqliteStoreError> {
    let row: Option<(Vec<u8>, String, String)> = connection
        .query_row(
            "SELECT record_json, record_hash, hash_algorithm FROM runs WHERE run_id = ?1",
            params![run_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(db_error)?;
    let Some((bytes, hash_value, hash_algorithm)) = row else {
        return Ok(None);
    };
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RECORD_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    let algorithm = HashAlgorithm::from_label(&hash_algorithm).ok_or_else(|| {
        SqliteStoreError::Invalid(format!("unsupported hash algorithm: {hash_algorithm}"))
    })?;
    if !(ContentDigest { algorithm, hex: hash_value }).matches(&bytes) {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for run {run_id}")));
    }
    let record: RunRecord = decode_json(&bytes, "run record")?;
    if &record.run_id != run_id {
        return Err(SqliteStoreError::Invalid(
            "run_id mismatch between key and payload".to_string(),
        ));
    }
    Ok(Some(record))
}

/// Returns true when `(run_id, action_id)` is already recorded.
fn event_exists(
    connection: &Connection,
    run_id: &RunId,
    action_id: &ActionId,
) -> Result<bool, SqliteStoreError> {
    connection
        .query_row(
            "SELECT 1 FROM run_events WHERE run_id = ?1 AND action_id = ?2",
            params![run_id.as_str(), action_id.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(db_error)
}

/// Inserts an event with the next per-run sequence number.
fn insert_event(tx: &Transaction<'_>, event: &RunEvent) -> Result<u64, SqliteStoreError> {
    let seq: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = ?1",
            params![event.run_id.as_str()],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    let mut stored = event.clone();
    stored.seq = 0;
    let json = canonical_text(&stored)?;
    tx.execute(
        "INSERT INTO run_events (run_id, seq, action_id, event_type, recorded_at, event_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.run_id.as_str(),
            seq,
            event.action_id.as_str(),
            event.event_type.as_str(),
            event.recorded_at.as_unix_millis(),
            json,
        ],
    )
    .map_err(db_error)?;
    from_sql_int(seq, "seq")
}

/// Encodes evidence items as `(evidence_id, canonical json)` pairs.
fn encode_evidence(items: &[EvidenceItem]) -> Result<Vec<(&str, String)>, SqliteStoreError> {
    items
        .iter()
        .map(|item| canonical_text(item).map(|json| (item.evidence_id.as_str(), json)))
        .collect()
}

/// Stores new evidence items and links every item to `run_id`.
fn link_evidence(
    tx: &Transaction<'_>,
    run_id: &RunId,
    encoded: &[(&str, String)],
) -> Result<(), SqliteStoreError> {
    for (evidence_id, json) in encoded {
        let existing: Option<String> = tx
            .query_row(
                "SELECT item_json FROM evidence_items WHERE evidence_id = ?1",
                params![evidence_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        match existing {
            Some(existing) if &existing != json => {
                return Err(SqliteStoreError::Invalid(format!(
                    "evidence {evidence_id} is immutable"
                )));
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO evidence_items (evidence_id, item_json) VALUES (?1, ?2)",
                    params![evidence_id, json],
                )
                .map_err(db_error)?;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO run_evidence (run_id, evidence_id) VALUES (?1, ?2)",
            params![run_id.as_str(), evidence_id],
        )
        .map_err(db_error)?;
    }
    Ok(())
}

/// Decodes a stored event and stamps its sequence number.
fn decode_event(seq: i64, json: &str) -> Result<RunEvent, SqliteStoreError> {
    let mut event: RunEvent = decode_json(json.as_bytes(), "run event")?;
    event.seq = from_sql_int(seq, "seq")?;
    Ok(event)
}

/// Serializes `value` as canonical JSON text.
fn canonical_text<T: Serialize + ?Sized>(value: &T) -> Result<String, SqliteStoreError> {
    let bytes =
        canonical_bytes(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Deserializes a stored JSON payload.
fn decode_json<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_slice(bytes)
        .map_err(|err| SqliteStoreError::Corrupt(format!("invalid stored {what}: {err}")))
}

/// Parses a snake-case label column into its enum.
fn parse_label<T: DeserializeOwned>(label: &str, column: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_value(serde_json::Value::String(label.to_string()))
        .map_err(|_| SqliteStoreError::Corrupt(format!("invalid {column} label: {label}")))
}

/// Converts a counter to an `SQLite` integer.
fn to_sql_int(value: u64, column: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("{column} out of range")))
}

/// Converts an `SQLite` integer to a counter.
fn from_sql_int(value: i64, column: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative {column}")))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx =
        connection.transaction_with_behavior(TransactionBehavior::Immediate).map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    subject_id TEXT,
                    lock_token TEXT,
                    revision INTEGER NOT NULL,
                    record_json BLOB NOT NULL,
                    record_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_lock_token
                    ON runs (lock_token) WHERE lock_token IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);
                CREATE TABLE IF NOT EXISTS run_events (
                    run_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    action_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL,
                    event_json TEXT NOT NULL,
                    PRIMARY KEY (run_id, seq),
                    UNIQUE (run_id, action_id),
                    FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS evidence_items (
                    evidence_id TEXT PRIMARY KEY,
                    item_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS run_evidence (
                    run_id TEXT NOT NULL,
                    evidence_id TEXT NOT NULL,
                    PRIMARY KEY (run_id, evidence_id),
                    FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE,
                    FOREIGN KEY (evidence_id) REFERENCES evidence_items(evidence_id)
                );
                CREATE TABLE IF NOT EXISTS subject_fingerprints (
                    subject_id TEXT PRIMARY KEY,
                    fingerprint_json TEXT NOT NULL,
                    observed_at INTEGER NOT NULL
                );",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
