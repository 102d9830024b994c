// crates/run-gate-config/tests/validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Fail-closed validation of every config section.
// Purpose: Ensure out-of-range and inconsistent settings are rejected.
// Dependencies: run-gate-config, run-gate-core
// ============================================================================

//! Validation tests for policy, lease, approval, store, and logging sections.

mod common;

use std::path::PathBuf;

use run_gate_config::ConfigError;
use run_gate_config::LogFormat;
use run_gate_config::RunGateConfig;
use run_gate_config::StoreType;
use run_gate_config::config_toml_example;
use run_gate_core::ClaimType;
use run_gate_core::Tier;

use crate::common::claim;
use crate::common::config_from_toml;
use crate::common::minimal_config;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if !message.contains(needle) {
                return Err(format!("error '{message}' did not contain '{needle}'"));
            }
            Ok(())
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

// ============================================================================
// SECTION: Defaults and Example
// ============================================================================

#[test]
fn empty_config_uses_validated_defaults() -> TestResult {
    let config = minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    if config.store.store_type != StoreType::Memory {
        return Err("default store should be memory".to_string());
    }
    if config.logging.level != "warn" || config.logging.format != LogFormat::Compact {
        return Err("unexpected logging defaults".to_string());
    }
    let bounds = config.lease_bounds();
    if bounds.min_minutes() != 1 || bounds.max_minutes() != 30 {
        return Err("unexpected lease bounds".to_string());
    }
    Ok(())
}

#[test]
fn canonical_example_parses_and_validates() -> TestResult {
    let config =
        RunGateConfig::from_toml(&config_toml_example()).map_err(|err| err.to_string())?;
    let policy = config.gate_policy().map_err(|err| err.to_string())?;
    if policy.version != "2026-10" || policy.claims.len() != 3 {
        return Err("example policy not loaded".to_string());
    }
    if policy.tier_for(&ClaimType::new("availability")) != Tier::B {
        return Err("availability should be tier b".to_string());
    }
    if config.store.sqlite().is_none() {
        return Err("example should select the sqlite store".to_string());
    }
    let approval = config.approval_policy();
    if approval.source_tag != "rg" || approval.authorized_actors.len() != 1 {
        return Err("unexpected approval policy".to_string());
    }
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    let result = config_from_toml("[policy]\nautorefetch = false\n");
    if result.is_ok() {
        return Err("misspelled key should not parse".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Policy
// ============================================================================

#[test]
fn threshold_outside_unit_interval_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.policy.threshold = 1.2;
    assert_invalid(config.validate(), "policy.threshold")?;
    config.policy.threshold = f64::NAN;
    assert_invalid(config.validate(), "policy.threshold")
}

#[test]
fn claim_min_confidence_outside_unit_interval_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    let mut rule = claim("price", Tier::A);
    rule.min_confidence = Some(-0.1);
    config.policy.claims.push(rule);
    assert_invalid(config.validate(), "min_confidence")
}

#[test]
fn duplicate_claim_types_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.policy.claims.push(claim("price", Tier::A));
    config.policy.claims.push(claim(" price ", Tier::B));
    assert_invalid(config.validate(), "duplicate claim_type")
}

#[test]
fn blank_claim_type_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.policy.claims.push(claim("  ", Tier::B));
    assert_invalid(config.validate(), "claim_type must be non-empty")
}

#[test]
fn zero_freshness_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    let mut rule = claim("price", Tier::A);
    rule.freshness_secs = Some(0);
    config.policy.claims.push(rule);
    assert_invalid(config.validate(), "freshness_secs")
}

#[test]
fn conflict_tier_outside_scale_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.policy.conflict_min_trust_tier = 0;
    assert_invalid(config.validate(), "conflict_min_trust_tier")?;
    config.policy.conflict_min_trust_tier = 6;
    assert_invalid(config.validate(), "conflict_min_trust_tier")
}

#[test]
fn claim_rules_fall_back_to_threshold_and_tier_requirement() -> TestResult {
    let config = config_from_toml(
        r#"
[policy]
threshold = 0.75

[[policy.claims]]
claim_type = "price"
tier = "a"

[[policy.claims]]
claim_type = "availability"
tier = "b"
freshness_secs = 60
"#,
    )
    .map_err(|err| err.to_string())?;
    let policy = config.gate_policy().map_err(|err| err.to_string())?;
    let price = policy.claim_policy(&ClaimType::new("price")).ok_or("missing price")?;
    if (price.min_confidence - 0.75).abs() > f64::EPSILON || !price.required {
        return Err("price should inherit threshold and be required".to_string());
    }
    let availability =
        policy.claim_policy(&ClaimType::new("availability")).ok_or("missing availability")?;
    if availability.required || availability.freshness_ms != 60_000 {
        return Err("availability rule not converted".to_string());
    }
    if policy.tier_for(&ClaimType::new("unlisted")) != Tier::C {
        return Err("unknown claim types should be tier c".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Lease
// ============================================================================

#[test]
fn lease_bounds_outside_limits_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.lease.max_minutes = 31;
    assert_invalid(config.validate(), "lease minutes")?;
    config.lease.max_minutes = 30;
    config.lease.min_minutes = 0;
    assert_invalid(config.validate(), "lease minutes")
}

#[test]
fn lease_default_outside_bounds_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.lease.min_minutes = 5;
    config.lease.default_minutes = 2;
    assert_invalid(config.validate(), "min_minutes <= default_minutes")
}

#[test]
fn zero_heartbeat_failures_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.lease.max_heartbeat_failures = 0;
    assert_invalid(config.validate(), "max_heartbeat_failures")
}

// ============================================================================
// SECTION: Approval
// ============================================================================

#[test]
fn source_tag_must_be_short_alphanumeric() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    for tag in ["", "r:g", "toolongtag", "r g"] {
        config.approval.source_tag = tag.to_string();
        assert_invalid(config.validate(), "approval.source_tag")?;
    }
    config.approval.source_tag = "Gate8".to_string();
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn callback_budget_outside_range_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.approval.max_callback_bytes = 15;
    assert_invalid(config.validate(), "max_callback_bytes")?;
    config.approval.max_callback_bytes = 257;
    assert_invalid(config.validate(), "max_callback_bytes")
}

#[test]
fn duplicate_or_blank_actors_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.approval.authorized_actors = vec!["ops-lead".to_string(), "ops-lead".to_string()];
    assert_invalid(config.validate(), "duplicate authorized actor")?;
    config.approval.authorized_actors = vec![" ".to_string()];
    assert_invalid(config.validate(), "must be non-empty")
}

// ============================================================================
// SECTION: Store and Logging
// ============================================================================

#[test]
fn memory_store_rejects_path() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.store.path = Some(PathBuf::from("run-gate.db"));
    assert_invalid(config.validate(), "memory store must not set path")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    assert_invalid(config.validate(), "sqlite store requires path")?;
    config.store.path = Some(PathBuf::from("a".repeat(300)));
    assert_invalid(config.validate(), "store path component too long")
}

#[test]
fn sqlite_store_carries_connection_settings() -> TestResult {
    let config = config_from_toml(
        "[store]\ntype = \"sqlite\"\npath = \"state/run.db\"\nbusy_timeout_ms = 250\n",
    )
    .map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    let sqlite = config.store.sqlite().ok_or("sqlite config missing")?;
    if sqlite.path != PathBuf::from("state/run.db") || sqlite.busy_timeout_ms != 250 {
        return Err("sqlite settings not carried".to_string());
    }
    Ok(())
}

#[test]
fn unknown_log_level_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.logging.level = "verbose".to_string();
    assert_invalid(config.validate(), "logging.level")
}
