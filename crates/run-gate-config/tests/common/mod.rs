// crates/run-gate-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for run-gate-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use run_gate_config::ClaimConfig;
use run_gate_config::RunGateConfig;
use run_gate_core::Tier;

/// Parses a TOML string into a `RunGateConfig` without validation.
pub fn config_from_toml(toml_str: &str) -> Result<RunGateConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<RunGateConfig, toml::de::Error> {
    config_from_toml("")
}

/// Returns a claim rule with only the required fields set.
pub fn claim(claim_type: &str, tier: Tier) -> ClaimConfig {
    ClaimConfig {
        claim_type: claim_type.to_string(),
        tier,
        min_confidence: None,
        freshness_secs: None,
        required: None,
    }
}
