//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;

use shai_hulud_scanner::core::config::Config;
use shai_hulud_scanner::core::errors::ShsError;
use shai_hulud_scanner::core::paths::resolve_absolute_path;
use shai_hulud_scanner::denylist::Denylist;
use shai_hulud_scanner::logger::dispatch::{LoggerConfig, spawn_logger};
use shai_hulud_scanner::logger::jsonl::JsonlConfig;
use shai_hulud_scanner::platform::pal::{Platform, classify_mount, detect_platform, list_volumes};
use shai_hulud_scanner::scanner::events::{
    CancelToken, MessageLevel, ScanEvent, ScanEventSink, ScanObserver, ScanUnit, TeeSink,
};
use shai_hulud_scanner::scanner::finding::{
    CheckIssue, Finding, IssueOutcome, ScanSummary, ScanVerdict, Severity,
};
use shai_hulud_scanner::scanner::git::GitCli;
use shai_hulud_scanner::scanner::orchestrator::ScanOrchestrator;

/// Shai-Hulud scanner: checks every local git repository for indicators of
/// the npm supply-chain worm.
#[derive(Debug, Parser)]
#[command(
    name = "shs",
    author,
    version,
    about = "Shai-Hulud indicator-of-compromise scanner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan local repositories for Shai-Hulud indicators.
    Scan(ScanArgs),
    /// Load the denylists and report entry counts and rejected lines.
    Denylists(DenylistArgs),
    /// List the volumes a full scan would cover.
    Volumes,
    /// Print the effective configuration.
    Config,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DenylistArgs {
    /// Hash denylist (`sha256[,description]` per line).
    #[arg(long, value_name = "PATH")]
    hashes: Option<PathBuf>,
    /// Filename denylist (`pattern,description` per line).
    #[arg(long, value_name = "PATH")]
    filenames: Option<PathBuf>,
    /// Package denylist (`name:version` per line).
    #[arg(long, value_name = "PATH")]
    packages: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct ScanArgs {
    /// Roots to scan instead of every local volume.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
    #[command(flatten)]
    denylists: DenylistArgs,
    /// Repository worker pool size.
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
    /// Report progress on stderr while scanning.
    #[arg(long)]
    progress: bool,
    /// Do not write the JSONL and text logs.
    #[arg(long)]
    no_log: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The scan completed and found indicators.
    #[error("{0} indicator(s) of compromise found")]
    FindingsDetected(u64),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::FindingsDetected(_) => 4,
        }
    }
}

impl From<ShsError> for CliError {
    fn from(err: ShsError) -> Self {
        match err {
            ShsError::InvalidConfig { .. }
            | ShsError::MissingConfig { .. }
            | ShsError::ConfigParse { .. }
            | ShsError::DenylistFormat { .. }
            | ShsError::DenylistEmpty { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Denylists(args) => run_denylists(cli, args),
        Command::Volumes => run_volumes(cli),
        Command::Config => run_config(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, overrides: &DenylistArgs) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &overrides.hashes {
        config.denylists.hashes.clone_from(path);
    }
    if let Some(path) = &overrides.filenames {
        config.denylists.filenames.clone_from(path);
    }
    if let Some(path) = &overrides.packages {
        config.denylists.packages.clone_from(path);
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config = load_config(cli, &args.denylists)?;
    if !args.paths.is_empty() {
        config.scanner.roots = args
            .paths
            .iter()
            .map(|path| resolve_absolute_path(path))
            .collect();
    }
    if let Some(parallelism) = args.parallelism {
        config.scanner.parallelism = parallelism;
    }
    config.validate()?;

    let mode = output_mode(cli);
    let platform = detect_platform()?;
    let lister = Arc::new(GitCli::new(
        config.matchers.git_binary.clone(),
        config.matchers.remote_name.clone(),
        config.matchers.remote_timeout(),
    ));

    let interrupted = Arc::new(AtomicBool::new(false));
    register_cancel_signals(&interrupted);
    let cancel =
        CancelToken::from_flag(interrupted).with_deadline(config.scanner.scan_deadline());

    let console = Arc::new(ConsoleSink::new(mode, cli.verbose, cli.quiet));
    let mut sinks: Vec<Box<dyn ScanEventSink>> = vec![Box::new(Arc::clone(&console))];
    let logger = if args.no_log {
        None
    } else {
        let (handle, join) = spawn_logger(LoggerConfig {
            jsonl: Some(JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            }),
            text_path: Some(config.paths.text_log.clone()),
            ..LoggerConfig::default()
        })?;
        sinks.push(Box::new(handle.clone()));
        Some((handle, join))
    };

    let mut orchestrator = ScanOrchestrator::new(
        config,
        platform,
        lister,
        Arc::new(TeeSink::new(sinks)),
    )
    .with_cancel(cancel);
    if args.progress && !cli.quiet {
        orchestrator = orchestrator.with_observer(Arc::new(ProgressObserver::default()));
    }

    let result = orchestrator.run();

    if let Some((handle, join)) = logger {
        handle.shutdown();
        if join.join().is_err() {
            eprintln!("[SHS-CLI] logger thread panicked; log files may be incomplete");
        }
    }

    let summary = result?;
    match mode {
        OutputMode::Human => print_summary_human(&summary, cli.quiet),
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "verdict": summary.verdict(),
                "summary": summary,
                "findings": console.findings(),
                "issues": console.issues(),
            });
            write_json_line(&payload)?;
        }
    }

    if summary.total_findings() > 0 {
        return Err(CliError::FindingsDetected(summary.total_findings()));
    }
    if summary.cancelled {
        return Err(CliError::Runtime(
            "scan was cancelled before completion".to_string(),
        ));
    }
    Ok(())
}

fn register_cancel_signals(flag: &Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(flag)) {
            eprintln!("[SHS-CLI] failed to register handler for signal {signal}: {e}");
        }
    }
}

/// Terminal presentation of scan events.
struct ConsoleSink {
    mode: OutputMode,
    verbose: bool,
    quiet: bool,
    findings: Mutex<Vec<Finding>>,
    issues: Mutex<Vec<CheckIssue>>,
}

impl ConsoleSink {
    fn new(mode: OutputMode, verbose: bool, quiet: bool) -> Self {
        Self {
            mode,
            verbose,
            quiet,
            findings: Mutex::new(Vec::new()),
            issues: Mutex::new(Vec::new()),
        }
    }

    fn findings(&self) -> Vec<Finding> {
        self.findings.lock().clone()
    }

    fn issues(&self) -> Vec<CheckIssue> {
        self.issues.lock().clone()
    }

    fn human(&self, event: &ScanEvent) {
        match event {
            ScanEvent::Message { level, text } => match level {
                MessageLevel::Info if self.verbose => eprintln!("{text}"),
                MessageLevel::Info => {}
                MessageLevel::Warn if !self.quiet => {
                    eprintln!("{} {text}", "warning:".yellow().bold());
                }
                MessageLevel::Warn => {}
                MessageLevel::Error => eprintln!("{} {text}", "error:".red().bold()),
            },
            ScanEvent::DenylistLineRejected(rejected) if !self.quiet => eprintln!(
                "{} {}:{}: {}",
                "warning:".yellow().bold(),
                rejected.path.display(),
                rejected.line_number,
                rejected.reason
            ),
            ScanEvent::VolumeStarted(volume) if self.verbose => {
                eprintln!("scanning {} ({})", volume.path.display(), volume.fs_type);
            }
            ScanEvent::CheckIssue(issue)
                if self.verbose || (issue.outcome == IssueOutcome::Failed && !self.quiet) =>
            {
                let location = issue.path.as_deref().unwrap_or(&issue.repo_path);
                eprintln!(
                    "{} {} check at {}: {}",
                    "incomplete:".yellow(),
                    issue.check.as_str(),
                    location.display(),
                    issue.details
                );
            }
            ScanEvent::FindingsBlock { repo_path, .. } => {
                println!("{}", repo_path.display().to_string().bold());
                for finding in self
                    .findings
                    .lock()
                    .iter()
                    .filter(|f| &f.repo_path == repo_path)
                {
                    println!("  {}", colorize_finding(finding));
                }
            }
            _ => {}
        }
    }
}

impl ScanEventSink for ConsoleSink {
    fn emit(&self, event: ScanEvent) {
        match &event {
            ScanEvent::Finding(finding) => self.findings.lock().push(finding.clone()),
            ScanEvent::CheckIssue(issue) => self.issues.lock().push(issue.clone()),
            _ => {}
        }
        if self.mode == OutputMode::Human {
            self.human(&event);
        }
    }
}

fn colorize_finding(finding: &Finding) -> String {
    let label = match finding.severity {
        Severity::High => "HIGH".red().bold(),
        Severity::Medium => "MEDIUM".yellow().bold(),
        Severity::Low => "LOW".normal(),
    };
    let location = finding.path.as_deref().unwrap_or(&finding.repo_path);
    format!(
        "[{label}] {} {}: {}",
        finding.category,
        location.display(),
        finding.detail
    )
}

/// Running counters on stderr, one carriage-return line.
#[derive(Default)]
struct ProgressObserver {
    volumes: AtomicU64,
    repositories: AtomicU64,
}

impl ScanObserver for ProgressObserver {
    fn on_unit_start(&self, unit: &ScanUnit) {
        if matches!(unit, ScanUnit::Volume(_)) {
            self.volumes.fetch_add(1, Ordering::Relaxed);
            self.render();
        }
    }

    fn on_unit_done(&self, unit: &ScanUnit) {
        if matches!(unit, ScanUnit::Repository(_)) {
            self.repositories.fetch_add(1, Ordering::Relaxed);
            self.render();
        }
    }
}

impl ProgressObserver {
    fn render(&self) {
        let mut stderr = io::stderr().lock();
        let _ = write!(
            stderr,
            "\r[shs] volumes: {}  repositories checked: {}",
            self.volumes.load(Ordering::Relaxed),
            self.repositories.load(Ordering::Relaxed)
        );
        let _ = stderr.flush();
    }
}

fn print_summary_human(summary: &ScanSummary, quiet: bool) {
    let verdict = match summary.verdict() {
        ScanVerdict::Clean => "CLEAN".green().bold(),
        ScanVerdict::Inconclusive => "INCONCLUSIVE".yellow().bold(),
        ScanVerdict::Compromised => "COMPROMISED".red().bold(),
    };
    if quiet {
        println!("{verdict}");
        return;
    }
    println!();
    println!("Shai-Hulud Scan Summary");
    println!("  Drives scanned:       {}", summary.drive_count);
    println!("  Repositories checked: {}", summary.repository_count);
    println!("  High findings:        {}", summary.high_count);
    println!("  Medium findings:      {}", summary.medium_count);
    println!("  Low findings:         {}", summary.low_count);
    println!("  Incomplete checks:    {}", summary.incomplete_checks);
    println!("  Skipped checks:       {}", summary.skipped_checks);
    if summary.cancelled {
        println!("  {}", "Scan was cancelled before completion.".yellow());
    }
    println!("  Verdict: {verdict}");
}

// ---------------------------------------------------------------------------
// denylists / volumes / config
// ---------------------------------------------------------------------------

fn run_denylists(cli: &Cli, args: &DenylistArgs) -> Result<(), CliError> {
    let config = load_config(cli, args)?;
    let load = Denylist::load(&config.denylists)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for list in &load.lists {
                println!(
                    "{:<10} {:>6} entries  {:>4} rejected  {}",
                    list.kind.as_str(),
                    list.entries.len(),
                    list.rejected.len(),
                    list.path.display()
                );
            }
            if cli.verbose {
                for rejected in load.rejected() {
                    println!(
                        "  {}:{}: {}",
                        rejected.path.display(),
                        rejected.line_number,
                        rejected.reason
                    );
                }
            }
        }
        OutputMode::Json => {
            let lists: Vec<Value> = load
                .lists
                .iter()
                .map(|list| {
                    json!({
                        "kind": list.kind,
                        "path": list.path.to_string_lossy(),
                        "entries": list.entries.len(),
                        "rejected": list.rejected,
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "denylists",
                "lists": lists,
                "total_entries": load.denylist.len(),
            }))?;
        }
    }
    Ok(())
}

fn run_volumes(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli, &DenylistArgs::default())?;
    let platform = detect_platform()?;
    let excluded = &config.scanner.excluded_paths;

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.verbose {
                for mount in platform.mount_points()? {
                    match classify_mount(&mount, excluded) {
                        None => println!("  {} {}", "scan".green(), mount.path.display()),
                        Some(reason) => println!(
                            "  {} {} ({reason:?}, {})",
                            "skip".dimmed(),
                            mount.path.display(),
                            mount.fs_type
                        ),
                    }
                }
            } else {
                for volume in list_volumes(platform.as_ref(), excluded)? {
                    println!(
                        "{}  {} ({})",
                        volume.path.display(),
                        volume.device,
                        volume.fs_type
                    );
                }
            }
        }
        OutputMode::Json => {
            let volumes = list_volumes(platform.as_ref(), excluded)?;
            write_json_line(&json!({
                "command": "volumes",
                "volumes": volumes,
            }))?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli, &DenylistArgs::default())?;
    let hash = config.stable_hash()?;

    match output_mode(cli) {
        OutputMode::Human => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
            println!("# source: {}", config.paths.config_file.display());
            println!("# hash: {hash}");
            println!("{toml_str}");
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "config",
                "hash": hash,
                "config": serde_json::to_value(&config)?,
            }))?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SHS_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
