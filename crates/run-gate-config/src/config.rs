// crates/run-gate-config/src/config.rs
// ============================================================================
// Module: Run Gate Configuration
// Description: Configuration loading and validation for Run Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: run-gate-core, run-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Unknown keys, out-of-range values, and inconsistent sections fail closed.
//! A validated config converts into the core [`GatePolicy`], [`LeaseBounds`],
//! and [`ApprovalPolicy`], and into the store configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use run_gate_core::ActorId;
use run_gate_core::ApprovalPolicy;
use run_gate_core::ClaimPolicy;
use run_gate_core::GatePolicy;
use run_gate_core::LeaseBounds;
use run_gate_core::MAX_HEARTBEAT_FAILURES;
use run_gate_core::MAX_LEASE_MINUTES;
use run_gate_core::MAX_TRUST_TIER;
use run_gate_core::MIN_LEASE_MINUTES;
use run_gate_core::Tier;
use run_gate_store_sqlite::SqliteStoreConfig;
use run_gate_store_sqlite::SqliteStoreMode;
use run_gate_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "run-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RUN_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of claim rules.
pub(crate) const MAX_CLAIM_RULES: usize = 256;
/// Maximum number of authorized approval actors.
pub(crate) const MAX_AUTHORIZED_ACTORS: usize = 256;
/// Maximum length of a claim type or actor identifier.
pub(crate) const MAX_IDENTIFIER_LENGTH: usize = 128;
/// Maximum length of the callback source tag.
pub(crate) const MAX_SOURCE_TAG_LENGTH: usize = 8;
/// Smallest accepted callback payload budget.
pub(crate) const MIN_CALLBACK_BYTES: usize = 16;
/// Largest accepted callback payload budget.
pub(crate) const MAX_CALLBACK_BYTES: usize = 256;
/// Default policy version label.
const DEFAULT_POLICY_VERSION: &str = "default";
/// Default overall threshold.
const DEFAULT_THRESHOLD: f64 = 0.6;
/// Default conflict trust tier.
const DEFAULT_CONFLICT_MIN_TRUST_TIER: u8 = 4;
/// Default lease length in minutes.
const DEFAULT_LEASE_MINUTES: u32 = 10;
/// Default callback source tag.
const DEFAULT_SOURCE_TAG: &str = "rg";
/// Default callback payload budget.
const DEFAULT_CALLBACK_BYTES: usize = 64;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Log levels accepted in `logging.level`.
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Run Gate configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunGateConfig {
    /// Gate policy configuration.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Lease configuration.
    #[serde(default)]
    pub lease: LeaseConfig,
    /// Approval channel configuration.
    #[serde(default)]
    pub approval: ApprovalConfig,
    /// Run store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Diagnostic logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RunGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| {
            ConfigError::Io(format!("{}: {err}", resolved.display()))
        })?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        self.lease.validate()?;
        self.approval.validate()?;
        self.store.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Builds the typed gate policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the policy fails validation.
    pub fn gate_policy(&self) -> Result<GatePolicy, ConfigError> {
        self.policy.to_gate_policy()
    }

    /// Returns the lease bounds.
    #[must_use]
    pub fn lease_bounds(&self) -> LeaseBounds {
        LeaseBounds::new(self.lease.min_minutes, self.lease.max_minutes)
    }

    /// Returns the approval gate policy.
    #[must_use]
    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.approval.to_approval_policy()
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Gate policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Policy version recorded in run snapshots.
    #[serde(default = "default_policy_version")]
    pub version: String,
    /// Overall score required to proceed.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Trust tier at which disagreeing sources form a critical conflict.
    #[serde(default = "default_conflict_min_trust_tier")]
    pub conflict_min_trust_tier: u8,
    /// Whether a checkpoint may refetch weak evidence once per run.
    #[serde(default = "default_true")]
    pub auto_refetch: bool,
    /// Claim rules.
    #[serde(default)]
    pub claims: Vec<ClaimConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: default_policy_version(),
            threshold: DEFAULT_THRESHOLD,
            conflict_min_trust_tier: DEFAULT_CONFLICT_MIN_TRUST_TIER,
            auto_refetch: true,
            claims: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Validates policy configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("policy.version must be non-empty".to_string()));
        }
        if !unit_interval(self.threshold) {
            return Err(ConfigError::Invalid("policy.threshold must be within [0, 1]".to_string()));
        }
        if self.conflict_min_trust_tier == 0 || self.conflict_min_trust_tier > MAX_TRUST_TIER {
            return Err(ConfigError::Invalid(format!(
                "policy.conflict_min_trust_tier must be within 1..={MAX_TRUST_TIER}"
            )));
        }
        if self.claims.len() > MAX_CLAIM_RULES {
            return Err(ConfigError::Invalid(format!(
                "policy.claims exceeds {MAX_CLAIM_RULES} entries"
            )));
        }
        let mut seen = BTreeSet::new();
        for claim in &self.claims {
            claim.validate()?;
            if !seen.insert(claim.claim_type.trim()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate claim_type: {}",
                    claim.claim_type.trim()
                )));
            }
        }
        Ok(())
    }

    /// Converts to the typed gate policy.
    fn to_gate_policy(&self) -> Result<GatePolicy, ConfigError> {
        let mut policy = GatePolicy::new(self.version.trim())
            .with_threshold(self.threshold)
            .with_auto_refetch(self.auto_refetch);
        policy.conflict_min_trust_tier = self.conflict_min_trust_tier;
        for claim in &self.claims {
            policy = policy.with_claim(claim.claim_type.trim(), claim.to_rule(self.threshold)?);
        }
        policy.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(policy)
    }
}

/// One claim rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimConfig {
    /// Claim type the rule applies to.
    pub claim_type: String,
    /// Criticality tier.
    pub tier: Tier,
    /// Confidence floor; defaults to `policy.threshold`.
    #[serde(default)]
    pub min_confidence: Option<f64>,
    /// Freshness window in seconds.
    #[serde(default)]
    pub freshness_secs: Option<u64>,
    /// Whether a missing claim scores zero; defaults to true for Tier A.
    #[serde(default)]
    pub required: Option<bool>,
}

impl ClaimConfig {
    /// Validates one claim rule.
    fn validate(&self) -> Result<(), ConfigError> {
        let claim_type = self.claim_type.trim();
        if claim_type.is_empty() {
            return Err(ConfigError::Invalid(
                "policy.claims.claim_type must be non-empty".to_string(),
            ));
        }
        if claim_type.len() > MAX_IDENTIFIER_LENGTH {
            return Err(ConfigError::Invalid(format!("claim_type {claim_type} is too long")));
        }
        if let Some(confidence) = self.min_confidence
            && !unit_interval(confidence)
        {
            return Err(ConfigError::Invalid(format!(
                "claim {claim_type}: min_confidence must be within [0, 1]"
            )));
        }
        if self.freshness_secs == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "claim {claim_type}: freshness_secs must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Converts to the core claim rule.
    fn to_rule(&self, threshold: f64) -> Result<ClaimPolicy, ConfigError> {
        let mut rule = ClaimPolicy::new(self.tier)
            .with_min_confidence(self.min_confidence.unwrap_or(threshold));
        if let Some(required) = self.required {
            rule = rule.with_required(required);
        }
        if let Some(secs) = self.freshness_secs {
            rule.freshness_ms = secs
                .checked_mul(1_000)
                .and_then(|millis| i64::try_from(millis).ok())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "claim {}: freshness_secs out of range",
                        self.claim_type.trim()
                    ))
                })?;
        }
        Ok(rule)
    }
}

// ============================================================================
// SECTION: Lease
// ============================================================================

/// Lease configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaseConfig {
    /// Shortest lease a worker may claim.
    #[serde(default = "default_min_minutes")]
    pub min_minutes: u32,
    /// Longest lease a worker may claim.
    #[serde(default = "default_max_minutes")]
    pub max_minutes: u32,
    /// Lease length used when a worker does not ask for one.
    #[serde(default = "default_lease_minutes")]
    pub default_minutes: u32,
    /// Consecutive heartbeat failures before a worker treats the lock as lost.
    #[serde(default = "default_max_heartbeat_failures")]
    pub max_heartbeat_failures: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            min_minutes: MIN_LEASE_MINUTES,
            max_minutes: MAX_LEASE_MINUTES,
            default_minutes: DEFAULT_LEASE_MINUTES,
            max_heartbeat_failures: MAX_HEARTBEAT_FAILURES,
        }
    }
}

impl LeaseConfig {
    /// Validates lease configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_minutes < MIN_LEASE_MINUTES || self.max_minutes > MAX_LEASE_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "lease minutes must stay within {MIN_LEASE_MINUTES}..={MAX_LEASE_MINUTES}"
            )));
        }
        if !(self.min_minutes <= self.default_minutes && self.default_minutes <= self.max_minutes)
        {
            return Err(ConfigError::Invalid(
                "lease requires min_minutes <= default_minutes <= max_minutes".to_string(),
            ));
        }
        if self.max_heartbeat_failures == 0 {
            return Err(ConfigError::Invalid(
                "lease.max_heartbeat_failures must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Approval
// ============================================================================

/// Approval channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    /// Tag prefixed to every callback payload.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    /// Actors allowed to decide gates.
    #[serde(default)]
    pub authorized_actors: Vec<String>,
    /// Maximum encoded callback size in bytes.
    #[serde(default = "default_callback_bytes")]
    pub max_callback_bytes: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            source_tag: default_source_tag(),
            authorized_actors: Vec::new(),
            max_callback_bytes: DEFAULT_CALLBACK_BYTES,
        }
    }
}

impl ApprovalConfig {
    /// Validates approval configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let tag = self.source_tag.as_str();
        if tag.is_empty()
            || tag.len() > MAX_SOURCE_TAG_LENGTH
            || !tag.chars().all(|ch| ch.is_ascii_alphanumeric())
        {
            return Err(ConfigError::Invalid(format!(
                "approval.source_tag must be 1..={MAX_SOURCE_TAG_LENGTH} ascii alphanumerics"
            )));
        }
        if !(MIN_CALLBACK_BYTES..=MAX_CALLBACK_BYTES).contains(&self.max_callback_bytes) {
            return Err(ConfigError::Invalid(format!(
                "approval.max_callback_bytes must be within \
                 {MIN_CALLBACK_BYTES}..={MAX_CALLBACK_BYTES}"
            )));
        }
        if self.authorized_actors.len() > MAX_AUTHORIZED_ACTORS {
            return Err(ConfigError::Invalid(format!(
                "approval.authorized_actors exceeds {MAX_AUTHORIZED_ACTORS} entries"
            )));
        }
        let mut seen = BTreeSet::new();
        for actor in &self.authorized_actors {
            let actor = actor.trim();
            if actor.is_empty() || actor.len() > MAX_IDENTIFIER_LENGTH {
                return Err(ConfigError::Invalid(
                    "approval.authorized_actors entries must be non-empty".to_string(),
                ));
            }
            if !seen.insert(actor) {
                return Err(ConfigError::Invalid(format!("duplicate authorized actor: {actor}")));
            }
        }
        Ok(())
    }

    /// Converts to the approval gate policy.
    fn to_approval_policy(&self) -> ApprovalPolicy {
        self.authorized_actors
            .iter()
            .fold(ApprovalPolicy::new(self.source_tag.as_str()), |policy, actor| {
                policy.with_actor(ActorId::new(actor.trim()))
            })
            .with_max_callback_bytes(self.max_callback_bytes)
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Run store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Run store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_store_path(path)
            }
        }
    }

    /// Returns the `SQLite` store configuration when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Diagnostic logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level emitted when `RUN_GATE_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: LogFormat::default() }
    }
}

impl LoggingConfig {
    /// Validates logging configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if LOG_LEVELS.contains(&self.level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default policy version.
fn default_policy_version() -> String {
    DEFAULT_POLICY_VERSION.to_string()
}

/// Returns the default threshold.
const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Returns the default conflict trust tier.
const fn default_conflict_min_trust_tier() -> u8 {
    DEFAULT_CONFLICT_MIN_TRUST_TIER
}

/// Returns true.
const fn default_true() -> bool {
    true
}

/// Returns the default minimum lease length.
const fn default_min_minutes() -> u32 {
    MIN_LEASE_MINUTES
}

/// Returns the default maximum lease length.
const fn default_max_minutes() -> u32 {
    MAX_LEASE_MINUTES
}

/// Returns the default lease length.
const fn default_lease_minutes() -> u32 {
    DEFAULT_LEASE_MINUTES
}

/// Returns the default heartbeat failure limit.
const fn default_max_heartbeat_failures() -> u32 {
    MAX_HEARTBEAT_FAILURES
}

/// Returns the default callback source tag.
fn default_source_tag() -> String {
    DEFAULT_SOURCE_TAG.to_string()
}

/// Returns the default callback payload budget.
const fn default_callback_bytes() -> usize {
    DEFAULT_CALLBACK_BYTES
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default log level.
fn default_log_level() -> String {
    "warn".to_string()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true for finite values in `[0.0, 1.0]`.
fn unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Resolves the config path from the argument, the environment, or the default name.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a store path against length constraints.
fn validate_store_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid("store path must be non-empty".to_string()));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("store path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("store path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
