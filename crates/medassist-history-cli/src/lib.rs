//! `medassist` command surface over the work history.
//!
//! Hosts can embed it through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_history_with_db`] for a `HistoryCommand` against a DB path.
//! - [`run_history`] for a `HistoryCommand` against an existing [`HistoryService`].

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use medassist_history_core::dispatch::all_descriptors;
use medassist_history_core::{
    format_rfc3339_millis, EntryStatus, HistoryEntry, ImportMode, ModuleKind, ModuleState,
    Rehydrated,
};
use medassist_history_store_sqlite::{
    HistoryConfig, HistoryService, Notification, NotificationLevel, Notifier, RecordOutcome,
    SqliteHistoryStore,
};
use serde::Serialize;
use serde_json::{json, Value};

pub mod config;

#[derive(Debug, Parser)]
#[command(name = "medassist")]
#[command(about = "MedAssist work history CLI")]
pub struct Cli {
    /// SQLite database file (defaults to the platform data directory).
    #[arg(long, env = "MEDASSIST_DB")]
    db: Option<PathBuf>,

    /// Log filter, e.g. `info` or `medassist_history_store_sqlite=debug`.
    #[arg(long, env = "MEDASSIST_LOG")]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log.as_deref()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        config::resolve_db_path(self.db.clone())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    History {
        #[command(subcommand)]
        command: Box<HistoryCommand>,
    },
    Autosave {
        #[command(subcommand)]
        command: AutosaveCommand,
    },
    /// Print the module dispatch table.
    Modules,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    List(ListArgs),
    Show(IdArgs),
    Delete(IdArgs),
    Clear(ClearArgs),
    Export(ExportArgs),
    Import(ImportArgs),
    /// Rebuild the originating module's state from an entry.
    Load(IdArgs),
    /// Record a concluded module operation from JSON payloads.
    Record(RecordArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, value_parser = parse_module_arg)]
    module: Option<ModuleKind>,
    #[arg(long)]
    status: Option<StatusArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long, value_enum, default_value_t = ImportModeArg::Add)]
    mode: ImportModeArg,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long, value_parser = parse_module_arg)]
    module: ModuleKind,
    /// Module input as JSON (a JSON string for text modules).
    #[arg(long)]
    input: String,
    /// Module result as JSON.
    #[arg(long, conflicts_with = "error", required_unless_present = "error")]
    output: Option<String>,
    /// Failure message of the operation.
    #[arg(long)]
    error: Option<String>,
    #[arg(long)]
    input_type: Option<String>,
    /// Save even when autosave is disabled.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Subcommand)]
pub enum AutosaveCommand {
    Status,
    Toggle,
    Set(AutosaveSetArgs),
}

#[derive(Debug, Args)]
pub struct AutosaveSetArgs {
    #[arg(long, action = ArgAction::Set)]
    enabled: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Completed,
    Error,
}

impl From<StatusArg> for EntryStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Completed => Self::Completed,
            StatusArg::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ImportModeArg {
    Add,
    Replace,
}

impl From<ImportModeArg> for ImportMode {
    fn from(value: ImportModeArg) -> Self {
        match value {
            ImportModeArg::Add => Self::Add,
            ImportModeArg::Replace => Self::Replace,
        }
    }
}

fn parse_module_arg(raw: &str) -> std::result::Result<ModuleKind, String> {
    ModuleKind::parse(raw)
        .ok_or_else(|| format!("unknown module `{raw}` (see `medassist modules`)"))
}

/// Prints service notifications on stderr so stdout stays machine-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notification: Notification) {
        let level = match notification.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "ok",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        eprintln!("[{level}] {}: {}", notification.title, notification.message);
    }
}

#[derive(Serialize)]
struct LoadView<'a> {
    label: &'static str,
    anchor: &'static str,
    #[serde(flatten)]
    rehydrated: &'a Rehydrated,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the database cannot be opened or migrated, or when
/// the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let db_path = cli.db_path();
    match cli.command {
        Command::Modules => print_json(&all_descriptors()),
        Command::History { command } => run_history_with_db(&db_path, *command),
        Command::Autosave { command } => {
            let mut service = open_service(&db_path)?;
            run_autosave(command, &mut service)
        }
    }
}

/// Executes one history command against the database at `db_path`.
///
/// # Errors
/// Returns an error when the database cannot be opened or the command fails.
pub fn run_history_with_db(db_path: &Path, command: HistoryCommand) -> Result<()> {
    let mut service = open_service(db_path)?;
    run_history(command, &mut service)
}

/// Executes one history command against an existing service.
///
/// # Errors
/// Returns an error when the command fails; details are also reported
/// through the service notifier.
pub fn run_history(command: HistoryCommand, service: &mut HistoryService) -> Result<()> {
    match command {
        HistoryCommand::List(args) => {
            let limit = args.limit.unwrap_or(service.config().list_limit);
            let entries = match (args.module, args.status) {
                (Some(module), Some(status)) => service
                    .store()
                    .list_by_module_and_status(module, status.into(), limit)?,
                (Some(module), None) => service.store().list_by_module(module, limit)?,
                (None, Some(status)) => service.store().list_by_status(status.into(), limit)?,
                (None, None) => service.store().list(limit)?,
            };

            if args.json {
                print_json(&entries)
            } else {
                print_entries(&entries);
                Ok(())
            }
        }
        HistoryCommand::Show(args) => {
            let entry = service
                .get(args.id)
                .ok_or_else(|| anyhow!("history entry {} not found", args.id))?;
            print_json(&entry)
        }
        HistoryCommand::Delete(args) => {
            let existed = service.get(args.id).is_some();
            if !service.delete_one(args.id) {
                bail!("failed to delete history entry {}", args.id);
            }
            print_json(&json!({"id": args.id, "deleted": existed}))
        }
        HistoryCommand::Clear(args) => {
            if !args.yes {
                bail!("refusing to clear the history without --yes");
            }
            if !service.clear_all() {
                bail!("failed to clear the history");
            }
            print_json(&json!({"cleared": true}))
        }
        HistoryCommand::Export(args) => {
            let entries = service.list_all().len();
            match service.export_to_dir(&args.dir) {
                Some(path) => print_json(&json!({"path": path, "entries": entries})),
                None if entries == 0 => print_json(&json!({"path": Value::Null, "entries": 0})),
                None => bail!("failed to export the history"),
            }
        }
        HistoryCommand::Import(args) => {
            let mode = ImportMode::from(args.mode);
            let imported = service
                .import_file(&args.file, mode)
                .ok_or_else(|| anyhow!("import of {} failed", args.file.display()))?;
            print_json(&json!({"imported": imported, "mode": mode.as_str()}))
        }
        HistoryCommand::Load(args) => {
            let entry = service
                .get(args.id)
                .ok_or_else(|| anyhow!("history entry {} not found", args.id))?;
            let rehydrated = service
                .load(args.id)
                .ok_or_else(|| anyhow!("history entry {} could not be loaded", args.id))?;
            let descriptor = entry.module.descriptor();
            print_json(&LoadView {
                label: descriptor.label,
                anchor: descriptor.anchor,
                rehydrated: &rehydrated,
            })
        }
        HistoryCommand::Record(args) => run_record(args, service),
    }
}

fn run_record(args: RecordArgs, service: &mut HistoryService) -> Result<()> {
    let input = parse_json_arg("--input", &args.input)?;
    let output = args
        .output
        .as_deref()
        .map(|raw| parse_json_arg("--output", raw))
        .transpose()?;
    let outcome = match (&output, args.error.as_deref()) {
        (Some(value), _) => Ok(value),
        (None, Some(message)) => Err(message),
        (None, None) => bail!("either --output or --error is required"),
    };

    let rehydrated = ModuleState::from_payloads(
        args.module,
        args.input_type.as_deref().unwrap_or_default(),
        &input,
        outcome,
    );
    if rehydrated.is_partial() {
        tracing::warn!(fallbacks = ?rehydrated.fallbacks, "payload fields fell back to defaults");
    }

    if args.force {
        let entry = service
            .save_to_history(&rehydrated.state.to_draft())
            .ok_or_else(|| anyhow!("failed to save the entry"))?;
        return print_json(&RecordOutcome::Appended(entry));
    }

    let outcome = service.record_completion(&rehydrated.state);
    print_json(&outcome)?;
    match outcome {
        RecordOutcome::Dropped(_) => bail!("failed to save the entry"),
        RecordOutcome::NotConcluded(_) => bail!("the operation has no result to record"),
        RecordOutcome::Appended(_) | RecordOutcome::Deferred(_) => {}
    }
    Ok(())
}

/// Executes one autosave command.
///
/// # Errors
/// Returns an error when the preference cannot be persisted.
pub fn run_autosave(command: AutosaveCommand, service: &mut HistoryService) -> Result<()> {
    let enabled = match command {
        AutosaveCommand::Status => service.autosave_enabled(),
        AutosaveCommand::Toggle => service
            .toggle_autosave()
            .ok_or_else(|| anyhow!("failed to toggle autosave"))?,
        AutosaveCommand::Set(args) => {
            if !service.set_autosave(args.enabled) {
                bail!("failed to update autosave");
            }
            args.enabled
        }
    };
    print_json(&json!({"enabled": enabled}))
}

fn open_service(db_path: &Path) -> Result<HistoryService> {
    config::ensure_db_parent(db_path)?;
    let store = SqliteHistoryStore::open(db_path)?;
    HistoryService::new(store, Box::new(StderrNotifier), HistoryConfig::default())
}

fn parse_json_arg(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entries(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("no history entries");
        return;
    }

    for entry in entries {
        let when = format_rfc3339_millis(entry.timestamp)
            .unwrap_or_else(|_| entry.timestamp.to_string());
        println!(
            "{:>6}  {when}  {:<22}  {:<9}  {} -> {}",
            entry.id.unwrap_or_default(),
            entry.module.as_str(),
            entry.status.as_str(),
            entry.input_summary,
            entry.output_summary
        );
    }
}
