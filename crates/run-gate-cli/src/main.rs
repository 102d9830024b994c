// crates/run-gate-cli/src/main.rs
// ============================================================================
// Module: Run Gate CLI Entry Point
// Description: Command dispatcher for run, lease, and approval workflows.
// Purpose: Let operators and shell workers drive runs against a shared store.
// Dependencies: clap, run-gate-config, run-gate-core, run-gate-store-sqlite
// ============================================================================

//! ## Overview
//! The `run-gate` binary drives the run lifecycle against the `SQLite` store
//! named in `run-gate.toml`. Every command prints one canonical JSON document
//! on stdout; diagnostics go to stderr. Typed refusals (lease denied, run not
//! in a permitted status, unauthorized approval) exit with status 2 so shell
//! workers can branch without parsing output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use run_gate_cli::clock::resolve_now;
use run_gate_cli::input::MAX_INPUT_BYTES;
use run_gate_cli::input::read_json;
use run_gate_cli::logging;
use run_gate_config::RunGateConfig;
use run_gate_config::config_toml_example;
use run_gate_core::ActionId;
use run_gate_core::ActorId;
use run_gate_core::ApprovalGate;
use run_gate_core::ApprovalOutcome;
use run_gate_core::ApprovalRequest;
use run_gate_core::ApprovalSignal;
use run_gate_core::CallbackData;
use run_gate_core::CheckpointOutcome;
use run_gate_core::CheckpointRequest;
use run_gate_core::ClaimOutcome;
use run_gate_core::ClaimType;
use run_gate_core::DenyReason;
use run_gate_core::EvidenceItem;
use run_gate_core::Fingerprint;
use run_gate_core::FingerprintChange;
use run_gate_core::FingerprintTracker;
use run_gate_core::ForceReleaseOutcome;
use run_gate_core::HeartbeatStatus;
use run_gate_core::LeaseManager;
use run_gate_core::LockToken;
use run_gate_core::NotifyError;
use run_gate_core::RandomTokenSource;
use run_gate_core::RefetchError;
use run_gate_core::ReleaseOutcome;
use run_gate_core::RunId;
use run_gate_core::RunMachine;
use run_gate_core::RunStatus;
use run_gate_core::StatusCheck;
use run_gate_core::SubjectIdentity;
use run_gate_core::Timestamp;
use run_gate_core::TransitionOutcome;
use run_gate_core::WorkerId;
use run_gate_core::WorkerSession;
use run_gate_store_sqlite::SqliteRunStore;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of an evidence set input.
const MAX_EVIDENCE_BYTES: usize = MAX_INPUT_BYTES;
/// Maximum size of a context pack input.
const MAX_CONTEXT_BYTES: usize = MAX_INPUT_BYTES;
/// Maximum size of a subject identity input.
const MAX_IDENTITY_BYTES: usize = 64 * 1024;
/// Exit status for typed refusals.
const EXIT_REFUSED: u8 = 2;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "run-gate", version, disable_help_subcommand = true)]
struct Cli {
    /// Optional config file path (defaults to run-gate.toml or `RUN_GATE_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Evaluate the command at this RFC 3339 time instead of the system clock.
    #[arg(long, value_name = "RFC3339", global = true)]
    at: Option<String>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Run lifecycle commands.
    Run {
        /// Selected run subcommand.
        #[command(subcommand)]
        command: RunCommand,
    },
    /// Lease commands.
    Lease {
        /// Selected lease subcommand.
        #[command(subcommand)]
        command: LeaseCommand,
    },
    /// Approval channel commands.
    Approval {
        /// Selected approval subcommand.
        #[command(subcommand)]
        command: ApprovalCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a Run Gate configuration file.
    Validate,
    /// Print the canonical example configuration.
    Example,
}

/// Run subcommands.
#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Create a run.
    Create(RunCreateCommand),
    /// List runs.
    List(RunListCommand),
    /// Report whether work may proceed on a run.
    Status(RunIdArgs),
    /// List the events of a run.
    Events(RunIdArgs),
    /// List the evidence linked to a run.
    Evidence(RunIdArgs),
    /// Remove the evidence links of a run that did not complete.
    DiscardEvidence(RunIdArgs),
    /// Start a created run.
    Start(RunStartCommand),
    /// Evaluate held evidence before an expensive step.
    Checkpoint(CheckpointCommand),
    /// Evaluate freshly gathered evidence for a run in refetch.
    ResolveRefetch(ResolveRefetchCommand),
    /// Move a started or approved run into running.
    Begin(WorkerStepArgs),
    /// Complete a running run.
    Complete(WorkerStepArgs),
    /// Fail a run with an error code.
    Fail(RunFailCommand),
    /// Pause a working run.
    Pause(WorkerStepArgs),
    /// Resume a paused run.
    Resume(WorkerStepArgs),
    /// Abort a non-terminal run.
    Abort(RunAbortCommand),
}

/// Lease subcommands.
#[derive(Subcommand, Debug)]
enum LeaseCommand {
    /// Claim the lease of a run.
    Claim(LeaseClaimCommand),
    /// Renew a held lease.
    Heartbeat(LeaseHeartbeatCommand),
    /// Release a held lease.
    Release(TokenArgs),
    /// Clear an expired lease.
    ForceRelease(RunIdArgs),
    /// Show the lease of a run.
    Status(RunIdArgs),
}

/// Approval subcommands.
#[derive(Subcommand, Debug)]
enum ApprovalCommand {
    /// Handle one approval callback.
    Handle(ApprovalHandleCommand),
}

/// Run identifier argument.
#[derive(Args, Debug)]
struct RunIdArgs {
    /// Run identifier.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
}

/// Lock token argument.
#[derive(Args, Debug)]
struct TokenArgs {
    /// Lock token returned by `lease claim`.
    #[arg(long, value_name = "TOKEN")]
    token: String,
}

/// Arguments for `lease heartbeat`.
#[derive(Args, Debug)]
struct LeaseHeartbeatCommand {
    /// Lock token returned by `lease claim`.
    #[arg(long, value_name = "TOKEN")]
    token: String,
    /// Heartbeats missed in a row before this one.
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    failures: u32,
}

/// Arguments shared by worker transitions.
#[derive(Args, Debug)]
struct WorkerStepArgs {
    /// Run identifier.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
    /// Lock token returned by `lease claim`.
    #[arg(long, value_name = "TOKEN")]
    token: String,
    /// Idempotency key for this step.
    #[arg(long, value_name = "ACTION_ID")]
    action_id: String,
}

/// Arguments for `run create`.
#[derive(Args, Debug)]
struct RunCreateCommand {
    /// Run identifier.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
    /// Subject the run works on.
    #[arg(long, value_name = "SUBJECT_ID")]
    subject_id: Option<String>,
}

/// Arguments for `run list`.
#[derive(Args, Debug)]
struct RunListCommand {
    /// Only list runs in this status.
    #[arg(long, value_name = "STATUS")]
    status: Option<String>,
}

/// Arguments for `run start`.
#[derive(Args, Debug)]
struct RunStartCommand {
    /// Worker step arguments.
    #[command(flatten)]
    step: WorkerStepArgs,
    /// JSON context pack recorded in the run snapshot.
    #[arg(long, value_name = "PATH")]
    context: Option<PathBuf>,
}

/// Arguments for `run checkpoint`.
#[derive(Args, Debug)]
struct CheckpointCommand {
    /// Worker step arguments.
    #[command(flatten)]
    step: WorkerStepArgs,
    /// JSON array of evidence items currently held.
    #[arg(long, value_name = "PATH")]
    evidence: PathBuf,
    /// JSON array of evidence returned by the silent refetch.
    #[arg(long, value_name = "PATH")]
    refetch: Option<PathBuf>,
    /// JSON subject identity observed for the run's subject.
    #[arg(long, value_name = "PATH")]
    identity: Option<PathBuf>,
}

/// Arguments for `run resolve-refetch`.
#[derive(Args, Debug)]
struct ResolveRefetchCommand {
    /// Worker step arguments.
    #[command(flatten)]
    step: WorkerStepArgs,
    /// JSON array of freshly gathered evidence.
    #[arg(long, value_name = "PATH")]
    evidence: PathBuf,
    /// JSON subject identity observed for the run's subject.
    #[arg(long, value_name = "PATH")]
    identity: Option<PathBuf>,
}

/// Arguments for `run fail`.
#[derive(Args, Debug)]
struct RunFailCommand {
    /// Worker step arguments.
    #[command(flatten)]
    step: WorkerStepArgs,
    /// Machine-readable failure code.
    #[arg(long, value_name = "CODE")]
    error_code: String,
}

/// Arguments for `run abort`.
#[derive(Args, Debug)]
struct RunAbortCommand {
    /// Run identifier.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
    /// Idempotency key for the abort.
    #[arg(long, value_name = "ACTION_ID")]
    action_id: String,
    /// Abort reason recorded in the event.
    #[arg(long, value_name = "TEXT", default_value = "operator abort")]
    reason: String,
}

/// Arguments for `lease claim`.
#[derive(Args, Debug)]
struct LeaseClaimCommand {
    /// Run identifier.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
    /// Claiming worker.
    #[arg(long, value_name = "WORKER_ID")]
    worker_id: String,
    /// Requested lease length; clamped to the configured bounds.
    #[arg(long, value_name = "MINUTES")]
    minutes: Option<u32>,
    /// Token of a lease this worker already holds.
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
}

/// Arguments for `approval handle`.
#[derive(Args, Debug)]
struct ApprovalHandleCommand {
    /// Identity of the human who pressed the button.
    #[arg(long, value_name = "ACTOR_ID")]
    actor_id: String,
    /// Raw callback string attached to the button.
    #[arg(long, value_name = "DATA")]
    callback: String,
    /// Transport-assigned identifier of this decision.
    #[arg(long, value_name = "DECISION_ID")]
    decision_id: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for operator-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self { message }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Command Context
// ============================================================================

/// Approval notifier handed to the run machine.
type Notifier<'a> = &'a dyn Fn(&ApprovalRequest) -> Result<(), NotifyError>;
/// Run machine over the `SQLite` store.
type Machine<'a> = RunMachine<SqliteRunStore, Notifier<'a>, RandomTokenSource>;

/// Loaded config, opened store, and evaluation time for one command.
struct Context {
    /// Validated configuration.
    config: RunGateConfig,
    /// Shared run store.
    store: SqliteRunStore,
    /// Evaluation time.
    now: Timestamp,
}

impl Context {
    /// Loads config, installs logging, and opens the store.
    fn open(config_path: Option<&Path>, at: Option<&str>) -> CliResult<Self> {
        let config = load_config(config_path)?;
        logging::init(&config.logging).map_err(|err| CliError::new(err.to_string()))?;
        let now = resolve_now(at).map_err(|err| CliError::new(err.to_string()))?;
        let sqlite = config.store.sqlite().ok_or_else(|| {
            CliError::new(
                "run commands require a shared store; set [store] type = \"sqlite\" and path"
                    .to_string(),
            )
        })?;
        let store = SqliteRunStore::new(sqlite)
            .map_err(|err| CliError::new(format!("failed to open run store: {err}")))?;
        Ok(Self { config, store, now })
    }

    /// Builds the run machine over the shared store.
    fn machine<'a>(&self, notifier: Notifier<'a>) -> CliResult<Machine<'a>> {
        let policy = self.config.gate_policy().map_err(|err| CliError::new(err.to_string()))?;
        Ok(RunMachine::new(self.store.clone(), notifier, RandomTokenSource, policy))
    }

    /// Builds the lease manager over the shared store.
    fn leases(&self) -> LeaseManager<SqliteRunStore, RandomTokenSource> {
        LeaseManager::new(self.store.clone(), RandomTokenSource, self.config.lease_bounds())
    }
}

/// Notifier for commands that never open a gate.
fn no_notifications(_request: &ApprovalRequest) -> Result<(), NotifyError> {
    Ok(())
}

/// Loads and validates the config file.
fn load_config(path: Option<&Path>) -> CliResult<RunGateConfig> {
    RunGateConfig::load(path).map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config { command } => command_config(&command, cli.config.as_deref()),
        Commands::Run { command } => {
            let ctx = Context::open(cli.config.as_deref(), cli.at.as_deref())?;
            command_run(&ctx, command)
        }
        Commands::Lease { command } => {
            let ctx = Context::open(cli.config.as_deref(), cli.at.as_deref())?;
            command_lease(&ctx, &command)
        }
        Commands::Approval { command } => {
            let ctx = Context::open(cli.config.as_deref(), cli.at.as_deref())?;
            command_approval(&ctx, &command)
        }
    }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Executes config subcommands.
fn command_config(command: &ConfigCommand, path: Option<&Path>) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate => {
            let config = load_config(path)?;
            config.gate_policy().map_err(|err| CliError::new(err.to_string()))?;
            write_stdout_line("config valid")?;
        }
        ConfigCommand::Example => write_stdout_bytes(config_toml_example().as_bytes())?,
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Run Commands
// ============================================================================

/// Dispatches run subcommands.
fn command_run(ctx: &Context, command: RunCommand) -> CliResult<ExitCode> {
    match command {
        RunCommand::Create(command) => command_run_create(ctx, &command),
        RunCommand::List(command) => command_run_list(ctx, &command),
        RunCommand::Status(command) => command_run_status(ctx, &command),
        RunCommand::Events(command) => {
            let events = ctx.machine(&no_notifications)?.events(&RunId::new(command.run_id));
            write_json(&to_json(&events.map_err(machine_error)?)?)?;
            Ok(ExitCode::SUCCESS)
        }
        RunCommand::Evidence(command) => {
            let evidence = ctx.machine(&no_notifications)?.evidence(&RunId::new(command.run_id));
            write_json(&to_json(&evidence.map_err(machine_error)?)?)?;
            Ok(ExitCode::SUCCESS)
        }
        RunCommand::DiscardEvidence(command) => {
            let run_id = RunId::new(command.run_id);
            let removed = ctx
                .machine(&no_notifications)?
                .discard_evidence(&run_id)
                .map_err(machine_error)?;
            write_json(&json!({ "run_id": run_id, "unlinked": removed }))?;
            Ok(ExitCode::SUCCESS)
        }
        RunCommand::Start(command) => command_run_start(ctx, &command),
        RunCommand::Checkpoint(command) => command_run_checkpoint(ctx, &command),
        RunCommand::ResolveRefetch(command) => command_run_resolve_refetch(ctx, &command),
        RunCommand::Begin(step) => {
            let (run_id, token, action_id) = step_ids(&step);
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.begin_work(&run_id, &token, &action_id, ctx.now))
        }
        RunCommand::Complete(step) => {
            let (run_id, token, action_id) = step_ids(&step);
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.complete(&run_id, &token, &action_id, ctx.now))
        }
        RunCommand::Fail(command) => {
            let (run_id, token, action_id) = step_ids(&command.step);
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.fail(
                &run_id,
                &token,
                &action_id,
                &command.error_code,
                ctx.now,
            ))
        }
        RunCommand::Pause(step) => {
            let (run_id, token, action_id) = step_ids(&step);
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.pause(&run_id, &token, &action_id, ctx.now))
        }
        RunCommand::Resume(step) => {
            let (run_id, token, action_id) = step_ids(&step);
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.resume(&run_id, &token, &action_id, ctx.now))
        }
        RunCommand::Abort(command) => {
            let run_id = RunId::new(command.run_id.as_str());
            let action_id = ActionId::new(command.action_id.as_str());
            let machine = ctx.machine(&no_notifications)?;
            report_transition(machine.abort(&run_id, &action_id, &command.reason, ctx.now))
        }
    }
}

/// Executes `run create`.
fn command_run_create(ctx: &Context, command: &RunCreateCommand) -> CliResult<ExitCode> {
    let machine = ctx.machine(&no_notifications)?;
    let record = machine
        .create_run(
            &RunId::new(command.run_id.as_str()),
            command.subject_id.as_deref().map(Into::into),
            ctx.now,
        )
        .map_err(machine_error)?;
    write_json(&json!({ "outcome": "created", "run": to_json(&record)? }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `run list`.
fn command_run_list(ctx: &Context, command: &RunListCommand) -> CliResult<ExitCode> {
    let status = match command.status.as_deref() {
        Some(label) => Some(
            RunStatus::from_label(label)
                .ok_or_else(|| CliError::new(format!("unknown run status: {label}")))?,
        ),
        None => None,
    };
    let runs = ctx
        .store
        .list_runs(status)
        .map_err(|err| CliError::new(format!("failed to list runs: {err}")))?;
    write_json(&to_json(&runs)?)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `run status`; exits 2 when work must not proceed.
fn command_run_status(ctx: &Context, command: &RunIdArgs) -> CliResult<ExitCode> {
    let run_id = RunId::new(command.run_id.as_str());
    let machine = ctx.machine(&no_notifications)?;
    let check = machine.check_status(&run_id).map_err(machine_error)?;
    let record = machine.run(&run_id).map_err(machine_error)?;
    let (proceed, status) = match check {
        StatusCheck::Proceed(status) => (true, status),
        StatusCheck::Refuse(status) => (false, status),
    };
    write_json(&json!({
        "run_id": run_id,
        "status": status.as_str(),
        "proceed": proceed,
        "lease_held": record.active_lease(ctx.now).is_some(),
        "revision": record.revision,
    }))?;
    Ok(if proceed { ExitCode::SUCCESS } else { ExitCode::from(EXIT_REFUSED) })
}

/// Executes `run start`.
fn command_run_start(ctx: &Context, command: &RunStartCommand) -> CliResult<ExitCode> {
    let (run_id, token, action_id) = step_ids(&command.step);
    let context_pack = command
        .context
        .as_deref()
        .map(|path| read_json::<Value>(path, "context pack", MAX_CONTEXT_BYTES))
        .transpose()
        .map_err(|err| CliError::new(err.to_string()))?;
    let machine = ctx.machine(&no_notifications)?;
    report_transition(machine.start(&run_id, &token, &action_id, context_pack, ctx.now))
}

/// Executes `run checkpoint`.
fn command_run_checkpoint(ctx: &Context, command: &CheckpointCommand) -> CliResult<ExitCode> {
    let (run_id, token, action_id) = step_ids(&command.step);
    let evidence = read_evidence(&command.evidence)?;
    let refetched = command.refetch.as_deref().map(read_evidence).transpose()?;
    let pending = RefCell::new(Vec::new());
    let capture = |request: &ApprovalRequest| -> Result<(), NotifyError> {
        pending.borrow_mut().push(request.clone());
        Ok(())
    };
    let machine = ctx.machine(&capture)?;
    let observed = observe_identity(ctx, &machine, &run_id, command.identity.as_deref())?;
    let request = CheckpointRequest {
        run_id: &run_id,
        lock_token: &token,
        action_id: &action_id,
        evidence: &evidence,
        subject_fingerprint: observed.as_ref().map(|(fingerprint, _)| fingerprint),
        now: ctx.now,
    };
    let mut refetcher = refetched.map(|items| {
        move |_claims: &[ClaimType]| Ok::<_, RefetchError>(items.clone())
    });
    let outcome = machine.evaluate_and_gate(request, refetcher.as_mut()).map_err(machine_error)?;
    report_checkpoint(ctx, outcome, &pending.borrow(), observed.as_ref())
}

/// Executes `run resolve-refetch`.
fn command_run_resolve_refetch(
    ctx: &Context,
    command: &ResolveRefetchCommand,
) -> CliResult<ExitCode> {
    let (run_id, token, action_id) = step_ids(&command.step);
    let evidence = read_evidence(&command.evidence)?;
    let pending = RefCell::new(Vec::new());
    let capture = |request: &ApprovalRequest| -> Result<(), NotifyError> {
        pending.borrow_mut().push(request.clone());
        Ok(())
    };
    let machine = ctx.machine(&capture)?;
    let observed = observe_identity(ctx, &machine, &run_id, command.identity.as_deref())?;
    let request = CheckpointRequest {
        run_id: &run_id,
        lock_token: &token,
        action_id: &action_id,
        evidence: &evidence,
        subject_fingerprint: observed.as_ref().map(|(fingerprint, _)| fingerprint),
        now: ctx.now,
    };
    let outcome = machine.resolve_refetch(request).map_err(machine_error)?;
    report_checkpoint(ctx, outcome, &pending.borrow(), observed.as_ref())
}

/// Records the observed subject identity and returns its fingerprint.
fn observe_identity(
    ctx: &Context,
    machine: &Machine<'_>,
    run_id: &RunId,
    identity: Option<&Path>,
) -> CliResult<Option<(Fingerprint, &'static str)>> {
    let Some(path) = identity else {
        return Ok(None);
    };
    let identity: SubjectIdentity = read_json(path, "subject identity", MAX_IDENTITY_BYTES)
        .map_err(|err| CliError::new(err.to_string()))?;
    let subject_id = machine.run(run_id).map_err(machine_error)?.subject_id.ok_or_else(|| {
        CliError::new(format!("run {run_id} has no subject_id to observe an identity for"))
    })?;
    let observation = FingerprintTracker::new(ctx.store.clone())
        .observe(&subject_id, &identity, ctx.now)
        .map_err(|err| CliError::new(format!("failed to observe identity: {err}")))?;
    let change = match observation.change {
        FingerprintChange::New => "new",
        FingerprintChange::Unchanged => "unchanged",
        FingerprintChange::Changed { .. } => "changed",
    };
    Ok(Some((observation.fingerprint, change)))
}

// ============================================================================
// SECTION: Lease Commands
// ============================================================================

/// Executes lease subcommands.
fn command_lease(ctx: &Context, command: &LeaseCommand) -> CliResult<ExitCode> {
    let leases = ctx.leases();
    match command {
        LeaseCommand::Claim(command) => {
            let minutes = command.minutes.unwrap_or(ctx.config.lease.default_minutes);
            let presented = command.token.as_deref().map(LockToken::new);
            let outcome = leases
                .claim(
                    &RunId::new(command.run_id.as_str()),
                    &WorkerId::new(command.worker_id.as_str()),
                    minutes,
                    presented.as_ref(),
                    ctx.now,
                )
                .map_err(|err| CliError::new(err.to_string()))?;
            match outcome {
                ClaimOutcome::Granted(grant) => {
                    write_json(&json!({
                        "outcome": "granted",
                        "run_id": grant.run_id,
                        "worker_id": grant.worker_id,
                        "lock_token": grant.lock_token,
                        "lock_expires_at": grant.lock_expires_at,
                        "lease_minutes": grant.lease_minutes,
                        "reclaimed": grant.reclaimed,
                        "max_heartbeat_failures": ctx.config.lease.max_heartbeat_failures,
                    }))?;
                    Ok(ExitCode::SUCCESS)
                }
                ClaimOutcome::Denied(reason) => {
                    write_json(&json!({ "outcome": "denied", "reason": deny_json(&reason) }))?;
                    Ok(ExitCode::from(EXIT_REFUSED))
                }
            }
        }
        LeaseCommand::Heartbeat(command) => {
            let token = LockToken::new(command.token.as_str());
            let limit = ctx.config.lease.max_heartbeat_failures;
            let session = WorkerSession::resume(&leases, &token, command.failures)
                .map_err(|err| CliError::new(err.to_string()))?;
            let status = match session {
                Some(session) => session.with_failure_limit(limit).heartbeat(ctx.now),
                None => HeartbeatStatus::LockLost,
            };
            let (body, code) = match status {
                HeartbeatStatus::Renewed => {
                    (json!({ "renewed": true, "status": "renewed" }), ExitCode::SUCCESS)
                }
                HeartbeatStatus::Missed { consecutive_failures } => (
                    json!({
                        "renewed": false,
                        "status": "missed",
                        "consecutive_failures": consecutive_failures,
                        "max_heartbeat_failures": limit,
                    }),
                    ExitCode::from(EXIT_REFUSED),
                ),
                HeartbeatStatus::LockLost => (
                    json!({ "renewed": false, "status": "lock_lost" }),
                    ExitCode::from(EXIT_REFUSED),
                ),
            };
            write_json(&body)?;
            Ok(code)
        }
        LeaseCommand::Release(command) => {
            let outcome = leases
                .release(&LockToken::new(command.token.as_str()), ctx.now)
                .map_err(|err| CliError::new(err.to_string()))?;
            match outcome {
                ReleaseOutcome::Released(run_id) => {
                    write_json(&json!({ "outcome": "released", "run_id": run_id }))?;
                    Ok(ExitCode::SUCCESS)
                }
                ReleaseOutcome::NotHeld => {
                    write_json(&json!({ "outcome": "not_held" }))?;
                    Ok(ExitCode::from(EXIT_REFUSED))
                }
            }
        }
        LeaseCommand::ForceRelease(command) => {
            let outcome = leases
                .force_release(&RunId::new(command.run_id.as_str()), ctx.now)
                .map_err(|err| CliError::new(err.to_string()))?;
            let (body, code) = match outcome {
                ForceReleaseOutcome::Released { previous_worker } => (
                    json!({ "outcome": "released", "previous_worker": previous_worker }),
                    ExitCode::SUCCESS,
                ),
                ForceReleaseOutcome::AlreadyRecorded => {
                    (json!({ "outcome": "already_recorded" }), ExitCode::SUCCESS)
                }
                ForceReleaseOutcome::LeaseActive { worker_id, lock_expires_at } => (
                    json!({
                        "outcome": "lease_active",
                        "worker_id": worker_id,
                        "lock_expires_at": lock_expires_at,
                    }),
                    ExitCode::from(EXIT_REFUSED),
                ),
                ForceReleaseOutcome::NoLease => {
                    (json!({ "outcome": "no_lease" }), ExitCode::from(EXIT_REFUSED))
                }
                ForceReleaseOutcome::RunNotFound => {
                    return Err(CliError::new(format!("run not found: {}", command.run_id)));
                }
            };
            write_json(&body)?;
            Ok(code)
        }
        LeaseCommand::Status(command) => {
            let status = leases
                .lease_status(&RunId::new(command.run_id.as_str()), ctx.now)
                .map_err(|err| CliError::new(err.to_string()))?
                .ok_or_else(|| CliError::new(format!("run not found: {}", command.run_id)))?;
            write_json(&json!({
                "run_id": command.run_id,
                "status": status.status.as_str(),
                "held": status.held,
                "lease": to_json(&status.lease)?,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Approval Commands
// ============================================================================

/// Executes approval subcommands.
fn command_approval(ctx: &Context, command: &ApprovalCommand) -> CliResult<ExitCode> {
    let ApprovalCommand::Handle(command) = command;
    let machine = ctx.machine(&no_notifications)?;
    let gate = ApprovalGate::new(&machine, ctx.config.approval_policy());
    let signal = ApprovalSignal {
        actor_id: ActorId::new(command.actor_id.as_str()),
        callback_data: command.callback.clone(),
        decision_id: ActionId::new(command.decision_id.as_str()),
    };
    let outcome = gate.handle(&signal, ctx.now).map_err(machine_error)?;
    let (body, code) = match outcome {
        ApprovalOutcome::Applied { action, run_id, status } => (
            json!({
                "outcome": "applied",
                "action": action.as_str(),
                "run_id": run_id,
                "status": status.as_str(),
            }),
            ExitCode::SUCCESS,
        ),
        ApprovalOutcome::AlreadyDecided { run_id, status } => (
            json!({ "outcome": "already_decided", "run_id": run_id, "status": status.as_str() }),
            ExitCode::SUCCESS,
        ),
        ApprovalOutcome::Unlocked { run_id } => {
            (json!({ "outcome": "unlocked", "run_id": run_id }), ExitCode::SUCCESS)
        }
        ApprovalOutcome::Unauthorized { actor_id } => (
            json!({ "outcome": "unauthorized", "actor_id": actor_id }),
            ExitCode::from(EXIT_REFUSED),
        ),
        ApprovalOutcome::Malformed { reason } => {
            (json!({ "outcome": "malformed", "reason": reason }), ExitCode::from(EXIT_REFUSED))
        }
        ApprovalOutcome::RunNotFound { run_id } => (
            json!({ "outcome": "run_not_found", "run_id": run_id }),
            ExitCode::from(EXIT_REFUSED),
        ),
        ApprovalOutcome::UnlockRefused { run_id, reason } => (
            json!({ "outcome": "unlock_refused", "run_id": run_id, "reason": reason }),
            ExitCode::from(EXIT_REFUSED),
        ),
    };
    write_json(&body)?;
    Ok(code)
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Prints a transition outcome.
fn report_transition(
    outcome: Result<TransitionOutcome, run_gate_core::MachineError>,
) -> CliResult<ExitCode> {
    match outcome.map_err(machine_error)? {
        TransitionOutcome::Applied(record) => {
            write_json(&json!({ "outcome": "applied", "run": to_json(&record)? }))?;
            Ok(ExitCode::SUCCESS)
        }
        TransitionOutcome::AlreadyApplied(record) => {
            write_json(&json!({ "outcome": "already_applied", "run": to_json(&record)? }))?;
            Ok(ExitCode::SUCCESS)
        }
        TransitionOutcome::NotApplied { current } => {
            write_json(&json!({ "outcome": "not_applied", "status": current.as_str() }))?;
            Ok(ExitCode::from(EXIT_REFUSED))
        }
    }
}

/// Prints a checkpoint outcome together with any approval requests sent.
fn report_checkpoint(
    ctx: &Context,
    outcome: CheckpointOutcome,
    requests: &[ApprovalRequest],
    observed: Option<&(Fingerprint, &'static str)>,
) -> CliResult<ExitCode> {
    let fingerprint = observed.map(|(fingerprint, change)| {
        json!({ "fingerprint": fingerprint, "change": change })
    });
    let (body, code) = match outcome {
        CheckpointOutcome::Proceed { record, report } => (
            json!({
                "outcome": "proceed",
                "run": to_json(&record)?,
                "breaker": to_json(&report.summary(ctx.now))?,
                "subject": fingerprint,
            }),
            ExitCode::SUCCESS,
        ),
        CheckpointOutcome::Gated { record, report, nonce, notified } => (
            json!({
                "outcome": "gated",
                "run": to_json(&record)?,
                "breaker": to_json(&report.summary(ctx.now))?,
                "nonce": nonce,
                "notified": notified,
                "approvals": approval_json(ctx, requests)?,
                "subject": fingerprint,
            }),
            ExitCode::SUCCESS,
        ),
        CheckpointOutcome::AlreadyRecorded(record) => (
            json!({ "outcome": "already_recorded", "run": to_json(&record)? }),
            ExitCode::SUCCESS,
        ),
        CheckpointOutcome::NotApplied { current } => (
            json!({ "outcome": "not_applied", "status": current.as_str() }),
            ExitCode::from(EXIT_REFUSED),
        ),
    };
    write_json(&body)?;
    Ok(code)
}

/// Renders approval requests with their encoded decision callbacks.
fn approval_json(ctx: &Context, requests: &[ApprovalRequest]) -> CliResult<Value> {
    let policy = ctx.config.approval_policy();
    let mut rendered = Vec::with_capacity(requests.len());
    for request in requests {
        let mut buttons = Vec::new();
        for callback in CallbackData::for_request(&policy.source_tag, request) {
            let encoded = callback
                .encode(policy.max_callback_bytes)
                .map_err(|err| CliError::new(format!("failed to encode callback: {err}")))?;
            buttons.push(json!({ "action": callback.action.as_str(), "callback_data": encoded }));
        }
        rendered.push(json!({
            "run_id": request.run_id,
            "nonce": request.nonce,
            "reason": request.reason,
            "callbacks": buttons,
        }));
    }
    Ok(Value::Array(rendered))
}

/// Renders a lease denial.
fn deny_json(reason: &DenyReason) -> Value {
    match reason {
        DenyReason::Held { worker_id, lock_expires_at } => json!({
            "kind": "held",
            "worker_id": worker_id,
            "lock_expires_at": lock_expires_at,
        }),
        DenyReason::Terminal(status) => json!({ "kind": "terminal", "status": status.as_str() }),
        DenyReason::RunNotFound => json!({ "kind": "run_not_found" }),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts worker step arguments into typed identifiers.
fn step_ids(step: &WorkerStepArgs) -> (RunId, LockToken, ActionId) {
    (
        RunId::new(step.run_id.as_str()),
        LockToken::new(step.token.as_str()),
        ActionId::new(step.action_id.as_str()),
    )
}

/// Reads an evidence array file.
fn read_evidence(path: &Path) -> CliResult<Vec<EvidenceItem>> {
    read_json(path, "evidence", MAX_EVIDENCE_BYTES).map_err(|err| CliError::new(err.to_string()))
}

/// Maps a state machine error into a CLI error.
fn machine_error(err: run_gate_core::MachineError) -> CliError {
    CliError::new(err.to_string())
}

/// Serializes a value into JSON.
fn to_json<T: Serialize>(value: &T) -> CliResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| CliError::new(format!("failed to serialize output: {err}")))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| output_error("stdout", &err))
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes).map_err(|err| output_error("stdout", &err))
}

/// Writes a canonical JSON value to stdout.
fn write_json(value: &Value) -> CliResult<()> {
    let mut bytes = serde_jcs::to_vec(value)
        .map_err(|err| CliError::new(format!("failed to serialize output: {err}")))?;
    bytes.push(b'\n');
    write_stdout_bytes(&bytes)
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error.
fn output_error(stream: &str, error: &std::io::Error) -> CliError {
    CliError::new(format!("failed to write {stream}: {error}"))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
