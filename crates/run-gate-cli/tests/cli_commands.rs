// crates/run-gate-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests driving the run-gate binary end to end.
// Purpose: Ensure CLI runs share state through the SQLite store and fail closed.
// Dependencies: run-gate-cli binary, run-gate-config, tempfile
// ============================================================================

//! ## Overview
//! Runs the CLI binary against a temporary `SQLite` store: a worker claims a
//! run, hits a weak-evidence gate, an operator approves through the encoded
//! callback, and the worker completes. Config failures must exit non-zero.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use run_gate_config::config_toml_example;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Evaluation time used by every command.
const AT: &str = "2026-01-01T00:00:00Z";
/// `AT` in unix milliseconds.
const AT_MILLIS: i64 = 1_767_225_600_000;

fn run_gate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_run-gate"))
}

fn write_config(dir: &TempDir) -> PathBuf {
    let db = dir.path().join("state").join("run-gate.db");
    let config = config_toml_example()
        .replace("path = \"run-gate.db\"", &format!("path = '{}'", db.display()));
    let path = dir.path().join("run-gate.toml");
    fs::write(&path, config).expect("write config");
    path
}

fn run_cli(config: &Path, at: &str, args: &[&str]) -> Output {
    Command::new(run_gate_bin())
        .arg("--config")
        .arg(config)
        .args(["--at", at])
        .args(args)
        .env_remove("RUN_GATE_LOG")
        .output()
        .expect("run cli")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|err| {
        panic!(
            "stdout is not json ({err}): {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn write_evidence(dir: &TempDir, name: &str, confidence: f64) -> PathBuf {
    let evidence = json!([{
        "evidence_id": format!("{name}-price"),
        "claim_type": "price",
        "value": 1999,
        "confidence": confidence,
        "trust_tier": 3,
        "observed_at": AT_MILLIS - 60_000,
        "source_id": "shop-a",
    }]);
    let path = dir.path().join(format!("{name}.json"));
    fs::write(&path, evidence.to_string()).expect("write evidence");
    path
}

fn claim(config: &Path, run_id: &str, worker_id: &str) -> Output {
    run_cli(
        config,
        AT,
        &["lease", "claim", "--run-id", run_id, "--worker-id", worker_id, "--minutes", "10"],
    )
}

fn create_and_start(config: &Path, run_id: &str) -> String {
    let created =
        run_cli(config, AT, &["run", "create", "--run-id", run_id, "--subject-id", "sku-1"]);
    assert!(
        created.status.success(),
        "create failed: {}",
        String::from_utf8_lossy(&created.stderr)
    );
    let granted = claim(config, run_id, "worker-a");
    assert!(granted.status.success());
    let token = stdout_json(&granted)["lock_token"].as_str().expect("lock token").to_string();
    let started = run_cli(
        config,
        AT,
        &["run", "start", "--run-id", run_id, "--token", &token, "--action-id", "start-1"],
    );
    assert!(started.status.success());
    assert_eq!(stdout_json(&started)["run"]["status"], "started");
    token
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn config_validate_accepts_example() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let output = run_cli(&config, AT, &["config", "validate"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("config valid"));
}

#[test]
fn config_validate_rejects_out_of_range_threshold() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run-gate.toml");
    fs::write(&path, "[policy]\nthreshold = 2.0\n").unwrap();
    let output = run_cli(&path, AT, &["config", "validate"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("policy.threshold"));
}

#[test]
fn config_example_prints_valid_toml() {
    let output = Command::new(run_gate_bin()).args(["config", "example"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), config_toml_example());
}

#[test]
fn run_commands_require_sqlite_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run-gate.toml");
    fs::write(&path, "[store]\ntype = \"memory\"\n").unwrap();
    let output = run_cli(&path, AT, &["run", "create", "--run-id", "run-1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("shared store"));
}

#[test]
fn weak_evidence_gates_until_operator_approves() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let token = create_and_start(&config, "run-1");
    let weak = write_evidence(&dir, "weak", 0.3);

    let gated = run_cli(
        &config,
        AT,
        &[
            "run",
            "checkpoint",
            "--run-id",
            "run-1",
            "--token",
            &token,
            "--action-id",
            "checkpoint-1",
            "--evidence",
            weak.to_str().unwrap(),
        ],
    );
    assert!(gated.status.success());
    let gated = stdout_json(&gated);
    assert_eq!(gated["outcome"], "gated");
    assert_eq!(gated["run"]["status"], "waiting_approval");
    let callbacks = gated["approvals"][0]["callbacks"].as_array().expect("callbacks");
    assert_eq!(callbacks.len(), 3);
    let approve = callbacks
        .iter()
        .find(|callback| callback["action"] == "approve")
        .and_then(|callback| callback["callback_data"].as_str())
        .expect("approve callback")
        .to_string();

    let refused = run_cli(&config, AT, &["run", "status", "--run-id", "run-1"]);
    assert_eq!(refused.status.code(), Some(2));
    assert_eq!(stdout_json(&refused)["proceed"], false);

    let handle = |decision_id: &str| {
        run_cli(
            &config,
            AT,
            &[
                "approval",
                "handle",
                "--actor-id",
                "ops-lead",
                "--callback",
                &approve,
                "--decision-id",
                decision_id,
            ],
        )
    };
    let applied = handle("click-1");
    assert!(applied.status.success());
    assert_eq!(stdout_json(&applied)["outcome"], "applied");
    assert_eq!(stdout_json(&applied)["status"], "approved");
    let replay = handle("click-2");
    assert_eq!(stdout_json(&replay)["outcome"], "already_decided");

    let step = |verb: &str, action: &str| {
        run_cli(
            &config,
            AT,
            &["run", verb, "--run-id", "run-1", "--token", &token, "--action-id", action],
        )
    };
    assert!(step("begin", "begin-1").status.success());
    let done = step("complete", "complete-1");
    assert!(done.status.success());
    assert_eq!(stdout_json(&done)["run"]["status"], "done");

    let events = stdout_json(&run_cli(&config, AT, &["run", "events", "--run-id", "run-1"]));
    let types: Vec<&str> = events
        .as_array()
        .expect("events")
        .iter()
        .filter_map(|event| event["event_type"].as_str())
        .collect();
    assert_eq!(
        types,
        [
            "created",
            "lease_claimed",
            "started",
            "gate_opened",
            "approved",
            "running",
            "completed"
        ]
    );
}

#[test]
fn strong_evidence_proceeds_without_gate() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let token = create_and_start(&config, "run-2");
    let strong = write_evidence(&dir, "strong", 0.9);
    let output = run_cli(
        &config,
        AT,
        &[
            "run",
            "checkpoint",
            "--run-id",
            "run-2",
            "--token",
            &token,
            "--action-id",
            "checkpoint-1",
            "--evidence",
            strong.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    let body = stdout_json(&output);
    assert_eq!(body["outcome"], "proceed");
    assert_eq!(body["breaker"]["verdict"], "proceed");
    let status = run_cli(&config, AT, &["run", "status", "--run-id", "run-2"]);
    assert!(status.status.success());
}

#[test]
fn second_worker_is_denied_until_lease_expires() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    create_and_start(&config, "run-3");

    let denied = claim(&config, "run-3", "worker-b");
    assert_eq!(denied.status.code(), Some(2));
    let body = stdout_json(&denied);
    assert_eq!(body["outcome"], "denied");
    assert_eq!(body["reason"]["worker_id"], "worker-a");

    let later = run_cli(
        &config,
        "2026-01-01T00:11:00Z",
        &["lease", "claim", "--run-id", "run-3", "--worker-id", "worker-b"],
    );
    assert!(later.status.success());
    assert_eq!(stdout_json(&later)["worker_id"], "worker-b");
}

#[test]
fn stale_token_heartbeat_reports_lock_lost() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let token = create_and_start(&config, "run-4");

    let renewed =
        run_cli(&config, "2026-01-01T00:05:00Z", &["lease", "heartbeat", "--token", &token]);
    assert!(renewed.status.success());
    assert_eq!(stdout_json(&renewed)["renewed"], true);

    let lost =
        run_cli(&config, "2026-01-01T00:30:00Z", &["lease", "heartbeat", "--token", &token]);
    assert_eq!(lost.status.code(), Some(2));
    let body = stdout_json(&lost);
    assert_eq!(body["renewed"], false);
    assert_eq!(body["status"], "missed");
    assert_eq!(body["consecutive_failures"], 1);
    assert_eq!(body["max_heartbeat_failures"], 3);

    let out = run_cli(
        &config,
        "2026-01-01T00:31:00Z",
        &["lease", "heartbeat", "--token", &token, "--failures", "2"],
    );
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stdout_json(&out)["status"], "lock_lost");
    let events = run_cli(&config, AT, &["run", "events", "--run-id", "run-4"]);
    let lock_lost = stdout_json(&events)
        .as_array()
        .unwrap()
        .iter()
        .filter(|event| event["event_type"] == "lock_lost")
        .count();
    assert_eq!(lock_lost, 1);
}

#[test]
fn heartbeat_failure_limit_comes_from_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let text = fs::read_to_string(&config)
        .unwrap()
        .replace("max_heartbeat_failures = 3", "max_heartbeat_failures = 1");
    fs::write(&config, text).unwrap();
    let token = create_and_start(&config, "run-7");

    let out =
        run_cli(&config, "2026-01-01T00:30:00Z", &["lease", "heartbeat", "--token", &token]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stdout_json(&out)["status"], "lock_lost");
}

#[test]
fn released_token_heartbeat_reports_lock_lost() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let token = create_and_start(&config, "run-8");
    let released = run_cli(&config, AT, &["lease", "release", "--token", &token]);
    assert!(released.status.success());

    let out = run_cli(&config, AT, &["lease", "heartbeat", "--token", &token]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stdout_json(&out)["status"], "lock_lost");
}

#[test]
fn unauthorized_actor_cannot_abort() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    create_and_start(&config, "run-5");
    let output = run_cli(
        &config,
        AT,
        &[
            "approval",
            "handle",
            "--actor-id",
            "intruder",
            "--callback",
            "rg:x:run-5",
            "--decision-id",
            "click-1",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["outcome"], "unauthorized");
    let status = run_cli(&config, AT, &["run", "status", "--run-id", "run-5"]);
    assert_eq!(stdout_json(&status)["status"], "started");
}

#[test]
fn operator_abort_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    create_and_start(&config, "run-6");
    let abort = || {
        run_cli(&config, AT, &["run", "abort", "--run-id", "run-6", "--action-id", "abort-1"])
    };
    let first = abort();
    assert!(first.status.success());
    assert_eq!(stdout_json(&first)["outcome"], "applied");
    let second = abort();
    assert!(second.status.success());
    assert_eq!(stdout_json(&second)["outcome"], "already_applied");

    let listed = stdout_json(&run_cli(&config, AT, &["run", "list", "--status", "aborted"]));
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}
