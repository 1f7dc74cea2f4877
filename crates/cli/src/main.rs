use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clone_core::{CloneConfig, CloneContext, StageResult, WindowMode};
use orchestrator::{CloneOrchestrator, Collaborators, OrchestratorError, RunReport};

const CONFIG_DIR: &str = "snapclone";
const CONFIG_FILE: &str = "config.toml";
const EXIT_REPORTED: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "snapclone")]
#[command(about = "Clone a database from a storage snapshot of its source", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Commands {
    /// Shut down a previous clone and drop its storage pools
    Stop,
    /// Open the consistency window and take the storage snapshot
    Prepare,
    /// Close the consistency window and capture the source state
    Finalize,
    /// Build the clone from a capture directory or archive
    Clone {
        /// Capture archive or directory; defaults to the stage directory
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Source-side capture into an archive, run on the source host
    #[command(hide = true)]
    Capture {
        #[arg(long)]
        archive: PathBuf,
    },
    /// End backup mode on the source after an aborted capture
    #[command(hide = true)]
    Release,
}

/// Flags overriding the configuration file. Accepted before or after the subcommand.
#[derive(Args, Debug, Default)]
struct Options {
    /// Configuration file [default: <config dir>/snapclone/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host running the source database, reached over ssh
    #[arg(long, global = true)]
    source_host: Option<String>,

    #[arg(long, global = true)]
    source_sid: Option<String>,

    #[arg(long, global = true)]
    target_sid: Option<String>,

    /// Consistency window: hot or cold
    #[arg(long, global = true, value_parser = parse_mode)]
    mode: Option<WindowMode>,

    /// Executable creating the storage snapshot
    #[arg(long, global = true)]
    snapshot_command: Option<String>,

    #[arg(long, global = true)]
    source_home: Option<PathBuf>,

    #[arg(long, global = true)]
    target_home: Option<PathBuf>,

    #[arg(long, global = true)]
    grid_home: Option<PathBuf>,

    /// Where the source writes its control-file backup
    #[arg(long, global = true)]
    controlfile_backup: Option<PathBuf>,

    #[arg(long, global = true)]
    data_dest: Option<String>,

    #[arg(long, global = true)]
    redo_dest: Option<String>,

    #[arg(long, global = true)]
    temp_dest: Option<String>,

    #[arg(long, global = true)]
    archive_dest: Option<String>,

    #[arg(long, global = true)]
    tempfile_size: Option<String>,

    #[arg(long, global = true)]
    sga_target_mb: Option<u64>,

    #[arg(long, global = true)]
    pga_target_mb: Option<u64>,

    /// Prefix for renamed storage pools [default: target identifier]
    #[arg(long, global = true)]
    pool_prefix: Option<String>,

    #[arg(long, global = true)]
    oracle_base: Option<PathBuf>,

    #[arg(long, global = true)]
    audit_dest: Option<PathBuf>,

    #[arg(long, global = true)]
    asm_sid: Option<String>,

    /// Ceiling for the remote capture, in seconds
    #[arg(long, global = true)]
    remote_timeout: Option<u64>,

    #[arg(long, global = true)]
    remote_dir: Option<PathBuf>,

    /// Directory holding capture state between discrete stages
    #[arg(long, global = true)]
    stage_dir: Option<PathBuf>,

    /// Verbose logs and keep scratch files
    #[arg(long, global = true)]
    debug: bool,

    /// Leave the clone shut down after it is built
    #[arg(long, global = true)]
    no_start: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,
}

fn parse_mode(value: &str) -> std::result::Result<WindowMode, String> {
    WindowMode::parse(value).ok_or_else(|| format!("unknown mode '{}', expected hot or cold", value))
}

impl Options {
    fn apply(&self, config: &mut CloneConfig) {
        config.source_host = self.source_host.clone().or(config.source_host.take());
        if let Some(sid) = &self.source_sid {
            config.source_sid = sid.clone();
        }
        if let Some(sid) = &self.target_sid {
            config.target_sid = sid.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config.snapshot_command = self
            .snapshot_command
            .clone()
            .or(config.snapshot_command.take());
        config.source_home = self.source_home.clone().or(config.source_home.take());
        config.target_home = self.target_home.clone().or(config.target_home.take());
        config.grid_home = self.grid_home.clone().or(config.grid_home.take());
        config.controlfile_backup = self
            .controlfile_backup
            .clone()
            .or(config.controlfile_backup.take());
        config.data_dest = self.data_dest.clone().or(config.data_dest.take());
        config.redo_dest = self.redo_dest.clone().or(config.redo_dest.take());
        config.temp_dest = self.temp_dest.clone().or(config.temp_dest.take());
        config.archive_dest = self.archive_dest.clone().or(config.archive_dest.take());
        config.tempfile_size = self.tempfile_size.clone().or(config.tempfile_size.take());
        if let Some(mb) = self.sga_target_mb {
            config.sga_target_mb = mb;
        }
        if let Some(mb) = self.pga_target_mb {
            config.pga_target_mb = mb;
        }
        config.pool_prefix = self.pool_prefix.clone().or(config.pool_prefix.take());
        if let Some(base) = &self.oracle_base {
            config.oracle_base = base.clone();
        }
        config.audit_dest = self.audit_dest.clone().or(config.audit_dest.take());
        if let Some(sid) = &self.asm_sid {
            config.asm_sid = sid.clone();
        }
        if let Some(secs) = self.remote_timeout {
            config.remote_timeout_secs = secs;
        }
        if let Some(dir) = &self.remote_dir {
            config.remote_dir = dir.clone();
        }
        config.stage_dir = self.stage_dir.clone().or(config.stage_dir.take());
        config.debug |= self.debug;
        if self.no_start {
            config.start_after_create = false;
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn read_config(path: &Path) -> Result<CloneConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// File configuration, when present, overridden by flags.
fn load_config(options: &Options) -> Result<CloneConfig> {
    let mut config = match &options.config {
        Some(path) if !path.exists() => bail!("Config file {} not found", path.display()),
        Some(path) => read_config(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_config(&path)?,
            _ => CloneConfig::default(),
        },
    };
    options.apply(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_REPORTED)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.options.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            let label = if code == EXIT_FATAL { "fatal:" } else { "error:" };
            eprintln!("{} {:#}", label.red().bold(), e);
            ExitCode::from(code)
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<OrchestratorError>() {
        Some(e) if e.is_fatal() => EXIT_FATAL,
        _ => EXIT_REPORTED,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.options)?;
    let work_dir = config.stage_dir.clone().unwrap_or_else(std::env::temp_dir);
    let collaborators = Collaborators::from_config(&config);
    let orchestrator = CloneOrchestrator::new(CloneContext::new(config, work_dir), collaborators);
    let json = cli.options.json;

    let interrupt = || async {
        let _ = tokio::signal::ctrl_c().await;
    };
    // Work that can hold the source releases it when interrupted.
    let shared = &orchestrator;
    let release = move || async move { shared.release().await.map(drop) };
    let nothing = || async { Ok::<(), OrchestratorError>(()) };

    match cli.command {
        None => {
            let report = interruptible(orchestrator.run(), interrupt(), release()).await?;
            print_report(&report, json)
        }
        Some(Commands::Stop) => {
            let report = interruptible(orchestrator.stop(), interrupt(), nothing()).await?;
            print_report(&report, json)
        }
        Some(Commands::Prepare) => {
            let report = interruptible(orchestrator.prepare(), interrupt(), release()).await?;
            print_report(&report, json)
        }
        Some(Commands::Finalize) => {
            let report = interruptible(orchestrator.finalize(), interrupt(), release()).await?;
            print_report(&report, json)
        }
        Some(Commands::Clone { archive }) => {
            let work = orchestrator.clone_from(archive.as_deref());
            let report = interruptible(work, interrupt(), nothing()).await?;
            print_report(&report, json)
        }
        Some(Commands::Capture { archive }) => {
            let work = orchestrator.capture_to_archive(&archive);
            let result = interruptible(work, interrupt(), release()).await?;
            print_result("capture", &result);
            Ok(())
        }
        Some(Commands::Release) => {
            let result = interruptible(orchestrator.release(), interrupt(), nothing()).await?;
            print_result("release", &result);
            Ok(())
        }
    }
}

/// Run `work` until it finishes or `interrupt` fires. This is the only place
/// a run reacts to interruption: the dropped work's guards clean up, then
/// `release` runs once.
async fn interruptible<T>(
    work: impl Future<Output = orchestrator::Result<T>>,
    interrupt: impl Future,
    release: impl Future<Output = orchestrator::Result<()>>,
) -> orchestrator::Result<T> {
    tokio::select! {
        result = work => result,
        _ = interrupt => {
            warn!("Interrupted");
            match release.await {
                Ok(()) => Err(OrchestratorError::Interrupted),
                Err(e) => {
                    error!(error = %e, "Release after interrupt failed");
                    Err(OrchestratorError::CompensationFailed {
                        original: Box::new(OrchestratorError::Interrupted),
                        compensation: e.to_string(),
                    })
                }
            }
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("Run {}", report.run_id);
    println!("════════════════════════════════════════");
    for record in &report.stages {
        print_result(record.stage.as_str(), &record.result);
    }

    let warnings = report.warnings();
    if !warnings.is_empty() {
        println!();
        println!("Warnings ({}):", warnings.len());
        for warning in warnings {
            println!("  {}", warning.yellow());
        }
    }
    println!();
    Ok(())
}

fn print_result(stage: &str, result: &StageResult) {
    let icon = match result.warning() {
        Some(_) => "!".yellow(),
        None => "✓".green(),
    };
    println!("  {} {:<9} {}", icon, stage, result.output());
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "snapclone=debug,orchestrator=debug,channels=debug,bundle=debug"
    } else {
        "snapclone=info,orchestrator=info,channels=info,bundle=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
