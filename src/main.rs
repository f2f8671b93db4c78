use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use deploy_sync::config::{self, AppConfig};
use deploy_sync::context::RunContext;
use deploy_sync::core::{RunOutcome, pipeline};
use deploy_sync::logging::{self, LogConfig};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "deploy-sync")]
#[command(about = "Parallel copy of web build artifacts to a deployment directory", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    sync: SyncArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the configured items to the destination (default)
    Sync(SyncArgs),
    /// Enumerate the configured items without copying
    Scan(ScanArgs),
    /// Write the default configuration as TOML
    InitConfig(InitConfigArgs),
}

#[derive(Args, Serialize, Clone, Default)]
struct CommonArgs {
    /// Configuration file [default: ./deploy-sync.toml if present]
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing the items
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long = "source")]
    source_root: Option<PathBuf>,

    /// Item to include, repeatable; replaces the configured list
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[arg(long = "item")]
    items: Vec<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Serialize, Clone, Default)]
struct SyncArgs {
    #[command(flatten)]
    #[serde(flatten)]
    common: CommonArgs,

    /// Deployment directory; emptied before copying
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long = "destination")]
    destination_root: Option<PathBuf>,

    /// Re-hash destination files after copying
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    verify: bool,

    /// fsync every copied file
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    sync_files: bool,

    /// Upper bound on copy threads
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long = "max-workers")]
    copy_workers_max: Option<usize>,

    /// Print the run summary as JSON on stdout
    #[serde(skip)]
    #[arg(long)]
    summary_json: bool,
}

#[derive(Args, Serialize, Clone)]
struct ScanArgs {
    #[command(flatten)]
    #[serde(flatten)]
    common: CommonArgs,

    /// Print every discovered relative path
    #[serde(skip)]
    #[arg(long)]
    list: bool,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Where to write the file
    #[arg(default_value = config::DEFAULT_CONFIG_FILE)]
    path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync(cli.sync));

    match run(command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Sync(args) => {
            let config = load_config(args.common.config.as_deref(), &args)?;
            init_logging(&config);
            run_sync(RunContext::new(config), args.summary_json).await
        }
        Commands::Scan(args) => {
            let config = load_config(args.common.config.as_deref(), &args)?;
            init_logging(&config);
            run_scan(RunContext::new(config), args.list).await
        }
        Commands::InitConfig(args) => {
            AppConfig::write_default(&args.path, args.force)?;
            println!("Wrote default configuration to {}", args.path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config<T: Serialize>(config_file: Option<&Path>, args: &T) -> Result<AppConfig> {
    if let Some(path) = config_file {
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
    }

    AppConfig::new(config_file, Some(args)).context("Failed to load configuration")
}

fn init_logging(config: &AppConfig) {
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });
}

async fn run_sync(ctx: RunContext, summary_json: bool) -> Result<ExitCode> {
    let cancel = ctx.cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || pipeline::run(&ctx));

    let joined = tokio::select! {
        joined = &mut task => joined,
        () = shutdown_signal() => {
            warn!("Shutdown requested, waiting for in-flight copies to finish");
            cancel.cancel();
            task.await
        }
    };

    let summary = joined.context("Sync task panicked")??;

    if summary_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    }

    let code = match summary.outcome() {
        RunOutcome::Complete => ExitCode::SUCCESS,
        RunOutcome::CompletedWithFailures => {
            for failure in &summary.failures {
                warn!(file = %failure.relative_path.display(), error = %failure.message, "Not copied");
            }
            ExitCode::from(EXIT_PARTIAL)
        }
        RunOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    };

    Ok(code)
}

async fn run_scan(ctx: RunContext, list: bool) -> Result<ExitCode> {
    let records = tokio::task::spawn_blocking(move || pipeline::scan(&ctx))
        .await
        .context("Scan task panicked")??;

    if list {
        for record in &records {
            println!("{}", record.relative_path.display());
        }
    }

    let total_bytes: u64 = records.iter().map(|r| r.size_bytes).sum();
    info!(files = records.len(), total_bytes, "Scan complete");

    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
