mod logging;

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use snapname_contracts::config::{AppSettings, DEFAULT_SETTINGS_FILE};
use snapname_contracts::events::{EventWriter, FanoutSink, ProgressEvent, RenamePhase};
use snapname_contracts::runs::summary::{write_summary, RunSummary};
use snapname_engine::orchestrator::new_run_id;
use snapname_engine::{Orchestrator, OracleRegistry};

use crate::logging::{init_subscriber, Verbosity};

const EXIT_STRANDED: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "snapname",
    version,
    about = "Rename images to descriptive titles from a vision model"
)]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rename every eligible image in a folder.
    Rename(RenameArgs),
    /// Show the settings file, or update it.
    Config(ConfigArgs),
}

#[derive(Debug, Default, Args)]
struct RenameArgs {
    /// Folder to process; defaults to the last folder used.
    #[arg(long)]
    dir: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Seconds to wait between batches.
    #[arg(long, conflicts_with = "no_delay")]
    delay: Option<u64>,
    #[arg(long)]
    no_delay: bool,
    /// Completion marker; an empty value disables it.
    #[arg(long)]
    suffix: Option<String>,
    /// Per-call oracle timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    model: Option<String>,
    /// `gemini` or `dryrun`.
    #[arg(long)]
    oracle: Option<String>,
    /// Append progress events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Write the run summary JSON here.
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
struct ConfigArgs {
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long, conflicts_with = "api_key")]
    clear_api_key: bool,
    #[arg(long)]
    default_folder: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    oracle: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    delay: Option<u64>,
    #[arg(long)]
    suffix: Option<String>,
    #[arg(long)]
    timeout: Option<u64>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("snapname error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);
    init_subscriber(verbosity);
    match cli.command {
        Command::Rename(args) => run_rename(&cli.config, args, verbosity),
        Command::Config(args) => {
            run_config(&cli.config, args)?;
            Ok(0)
        }
    }
}

fn run_rename(config_path: &Path, args: RenameArgs, verbosity: Verbosity) -> Result<i32> {
    let mut settings = AppSettings::load(config_path);
    apply_rename_overrides(&mut settings, &args);
    settings.rename.validate()?;

    let Some(dir) = args.dir.clone().or_else(|| settings.default_folder.clone()) else {
        bail!("no folder to process; pass --dir or set default_folder with `snapname config`");
    };
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let registry = OracleRegistry::from_settings(&settings)?;
    let oracle = registry.select(&settings.oracle)?;
    remember_folder(config_path, &dir);

    let run_id = new_run_id();
    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let mut sinks = FanoutSink::new().with(Arc::new(tx));
    if let Some(events_path) = &args.events {
        sinks = sinks.with(Arc::new(EventWriter::new(events_path, run_id.clone())));
    }

    let handle = Orchestrator::new(settings.rename.clone(), oracle, Arc::new(sinks))?
        .with_run_id(run_id)
        .spawn(&dir)?;
    let cancel = handle.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("snapname: cancelling after the current step");
        cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    for event in rx {
        if let Some(line) = render_event(&event, verbosity) {
            println!("{line}");
        }
    }
    let summary = handle.join()?;

    if let Some(path) = &args.summary {
        write_summary(path, &summary)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
    }
    for file in &summary.stranded {
        eprintln!(
            "snapname: '{}' is stranded as '{}' in {}; rename it back by hand ({})",
            file.original, file.temporary, file.directory, file.error
        );
    }
    Ok(exit_code(&summary))
}

fn apply_rename_overrides(settings: &mut AppSettings, args: &RenameArgs) {
    let rename = &mut settings.rename;
    if let Some(batch_size) = args.batch_size {
        rename.batch_size = batch_size;
    }
    if args.no_delay {
        rename.inter_batch_delay_seconds = 0;
    } else if let Some(delay) = args.delay {
        rename.inter_batch_delay_seconds = delay;
    }
    if let Some(suffix) = &args.suffix {
        rename.completion_suffix = suffix.clone();
    }
    if let Some(timeout) = args.timeout {
        rename.oracle_timeout_seconds = timeout;
    }
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(oracle) = &args.oracle {
        settings.oracle = oracle.clone();
    }
}

/// Saves `dir` as the default folder without persisting one-off overrides.
fn remember_folder(config_path: &Path, dir: &Path) {
    let mut stored = AppSettings::load(config_path);
    let folder = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if stored.default_folder.as_deref() == Some(folder.as_path()) {
        return;
    }
    stored.default_folder = Some(folder);
    if let Err(err) = stored.save(config_path) {
        let error = format!("{err:#}");
        tracing::warn!(path = %config_path.display(), error = %error, "could not remember folder");
    }
}

fn run_config(config_path: &Path, args: ConfigArgs) -> Result<()> {
    let mut settings = AppSettings::load(config_path);
    if apply_config_updates(&mut settings, args) {
        settings.rename.validate()?;
        settings.save(config_path)?;
        eprintln!("snapname: saved {}", config_path.display());
    }
    println!("{}", serde_json::to_string_pretty(&masked_settings(&settings)?)?);
    Ok(())
}

/// Returns whether anything changed.
fn apply_config_updates(settings: &mut AppSettings, args: ConfigArgs) -> bool {
    let mut changed = false;
    if args.clear_api_key {
        changed |= settings.api_key.take().is_some();
    }
    if let Some(key) = args.api_key.map(|key| key.trim().to_string()) {
        settings.api_key = Some(key).filter(|key| !key.is_empty());
        changed = true;
    }
    if let Some(folder) = args.default_folder {
        settings.default_folder = Some(folder);
        changed = true;
    }
    if let Some(model) = args.model {
        settings.model = model;
        changed = true;
    }
    if let Some(oracle) = args.oracle {
        settings.oracle = oracle;
        changed = true;
    }
    if let Some(batch_size) = args.batch_size {
        settings.rename.batch_size = batch_size;
        changed = true;
    }
    if let Some(delay) = args.delay {
        settings.rename.inter_batch_delay_seconds = delay;
        changed = true;
    }
    if let Some(suffix) = args.suffix {
        settings.rename.completion_suffix = suffix;
        changed = true;
    }
    if let Some(timeout) = args.timeout {
        settings.rename.oracle_timeout_seconds = timeout;
        changed = true;
    }
    changed
}

fn masked_settings(settings: &AppSettings) -> Result<Value> {
    let mut value = serde_json::to_value(settings)?;
    if let Some(key) = value.get_mut("api_key") {
        *key = Value::String("********".to_string());
    }
    Ok(value)
}

fn render_event(event: &ProgressEvent, verbosity: Verbosity) -> Option<String> {
    if verbosity == Verbosity::Quiet && !matches!(event, ProgressEvent::RunCompleted { .. }) {
        return None;
    }
    let line = match event {
        ProgressEvent::RunStarted {
            directory,
            eligible,
            batches,
        } => format!("{directory}: {eligible} image(s) to rename in {batches} batch(es)"),
        ProgressEvent::BatchStarted {
            batch,
            batches,
            files,
        } => format!("batch {batch}/{batches}: {} file(s)", files.len()),
        ProgressEvent::BatchCompleted {
            batch,
            batches,
            renamed,
            deferred,
        } => format!("batch {batch}/{batches} done: {renamed} renamed, {deferred} deferred"),
        ProgressEvent::FileRenamed {
            phase,
            original,
            renamed,
        } => match phase {
            RenamePhase::Batch => format!("  {original} -> {renamed}"),
            RenamePhase::Retry => format!("  {original} -> {renamed} (retry)"),
        },
        ProgressEvent::FileDeferred { original, reason } => {
            format!("  {original}: deferred to retry ({reason})")
        }
        ProgressEvent::FileRetried {
            original,
            temporary,
        } => format!("  {original}: retrying as {temporary}"),
        ProgressEvent::FileRestored { original, reason } => {
            format!("  {original}: kept original name ({reason})")
        }
        ProgressEvent::FileStranded { file } => format!(
            "  {}: STRANDED as {} ({})",
            file.original, file.temporary, file.error
        ),
        ProgressEvent::RunCompleted { summary } => summary_line(summary),
    };
    Some(line)
}

fn summary_line(summary: &RunSummary) -> String {
    let mut line = format!(
        "renamed {} of {} ({} in batch, {} on retry), kept {} original name(s)",
        summary.renamed(),
        summary.eligible,
        summary.renamed_in_batch,
        summary.renamed_in_retry,
        summary.untouched(),
    );
    if summary.cancelled {
        line.push_str(&format!(", cancelled with {} not attempted", summary.not_attempted));
    }
    if summary.needs_intervention() {
        line.push_str(&format!(", {} stranded", summary.stranded.len()));
    }
    line
}

fn exit_code(summary: &RunSummary) -> i32 {
    if summary.needs_intervention() {
        EXIT_STRANDED
    } else {
        0
    }
}
