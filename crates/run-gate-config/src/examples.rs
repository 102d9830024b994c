// crates/run-gate-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and `run-gate config example`.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for Run Gate configuration. The output is deterministic
//! and must always pass [`crate::RunGateConfig::validate`].

/// Returns a canonical example `run-gate.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[policy]
version = "2026-10"
threshold = 0.6
conflict_min_trust_tier = 4
auto_refetch = true

[[policy.claims]]
claim_type = "price"
tier = "a"
min_confidence = 0.6
freshness_secs = 86400
required = true

[[policy.claims]]
claim_type = "availability"
tier = "b"
freshness_secs = 3600

[[policy.claims]]
claim_type = "shipping_estimate"
tier = "c"
required = false

[lease]
min_minutes = 1
max_minutes = 30
default_minutes = 10
max_heartbeat_failures = 3

[approval]
source_tag = "rg"
authorized_actors = ["ops-lead"]
max_callback_bytes = 64

[store]
type = "sqlite"
path = "run-gate.db"
busy_timeout_ms = 5000
journal_mode = "wal"
sync_mode = "full"

[logging]
level = "info"
format = "compact"
"#,
    )
}
