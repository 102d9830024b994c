// crates/run-gate-cli/src/logging.rs
// ============================================================================
// Module: CLI Logging
// Description: Installs the diagnostic tracing subscriber.
// Purpose: Route library tracing events to stderr with a configurable filter.
// Dependencies: run-gate-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Diagnostics go to stderr so stdout stays machine-readable JSON. The filter
//! comes from `RUN_GATE_LOG` when set, otherwise from `logging.level`.
//!
//! ```bash
//! RUN_GATE_LOG=run_gate_core=debug run-gate run status --run-id run-1
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use run_gate_config::LogFormat;
use run_gate_config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the configured log filter.
pub const LOG_ENV_VAR: &str = "RUN_GATE_LOG";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Builds the filter from the environment, falling back to `fallback_level`.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when a directive does not parse.
pub fn build_filter(
    env_value: Option<&str>,
    fallback_level: &str,
) -> Result<EnvFilter, LoggingError> {
    let directives = env_value.filter(|value| !value.trim().is_empty()).unwrap_or(fallback_level);
    EnvFilter::try_new(directives).map_err(|err| LoggingError::Filter(err.to_string()))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber exists.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(env_value.as_deref(), &config.level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => {
            registry.with(fmt::layer().with_writer(std::io::stderr).compact()).try_init()
        }
        LogFormat::Json => {
            registry.with(fmt::layer().with_writer(std::io::stderr).json()).try_init()
        }
    };
    installed.map_err(|err| LoggingError::Install(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
