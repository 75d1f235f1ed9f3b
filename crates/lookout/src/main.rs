//! lookout: application performance monitoring and error alerting
//!
//! Lookout tracks transactions and spans, aggregates performance metrics,
//! deduplicates errors and fires alerts through email and webhooks.

mod config;
mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookout_apm::{Monitor, MonitorDeps};
use lookout_tracing::TraceWriter;
use tokio::signal;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CONFIG_FILE, Config, DEFAULT_CONFIG, LOOKOUT_DIR};

/// Application performance monitoring and error alerting
#[derive(Parser)]
#[command(name = "lookout")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .lookout directory or config file (default: search for .lookout/config.toml)
    #[arg(long, global = true, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .lookout directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration and print any problems
    Validate,

    /// Host a monitor with background sweeps until Ctrl-C
    Run,

    /// Drive synthetic traffic and print the resulting metrics as JSON
    Demo {
        /// Number of synthetic requests
        #[arg(long, default_value = "200")]
        requests: usize,

        /// Probability that a request's database call fails
        #[arg(long, default_value = "0.1")]
        failure_rate: f64,
    },
}

fn env_filter(verbose: bool, level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

/// Initialize logging for interactive commands.
/// Logs to stderr.
fn init_logging(verbose: bool, level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose, level))
        .init();
}

/// Initialize logging for `run`.
/// Logs to rotating files in .lookout/logs/ with daily rotation.
fn init_file_logging(logs_dir: &Path, verbose: bool, level: &str) {
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose, level);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "lookout.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop logging
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose, level))
        .init();
}

/// Load config from `--config` or auto-discover `.lookout/config.toml`.
///
/// Returns the config and the `.lookout` directory relative paths resolve against.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.clone()
        };
        let lookout_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(LOOKOUT_DIR));
        let config = Config::from_file(&config_file)?;
        return Ok((config, lookout_dir));
    }

    match Config::find_and_load()? {
        Some((config, lookout_dir)) => Ok((config, lookout_dir)),
        None => Ok((Config::default(), PathBuf::from(LOOKOUT_DIR))),
    }
}

/// Build a monitor from the config, wiring trace export and the email sender.
fn build_monitor(config: &Config, lookout_dir: &Path) -> Result<Monitor> {
    let mut deps = MonitorDeps::default();
    if let Some(sender) = &config.email.sender {
        deps = deps.with_email_sender(sender.clone());
    }

    let monitor = match config.resolve_export_target(lookout_dir) {
        Some(target) => {
            let writer = TraceWriter::new(target.clone())
                .with_context(|| format!("Failed to open trace export {:?}", target))?;
            info!("Exporting traces to {:?}", target);
            Monitor::with_trace_writer(config.apm.clone(), deps, writer)
        }
        None => Monitor::new(config.apm.clone(), deps),
    };
    Ok(monitor)
}

fn init_config(force: bool) -> Result<()> {
    let lookout_dir = PathBuf::from(LOOKOUT_DIR);
    let config_path = lookout_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(".lookout/config.toml already exists. Use --force to overwrite.");
    }

    if !lookout_dir.exists() {
        std::fs::create_dir_all(&lookout_dir)
            .with_context(|| format!("Failed to create {}", lookout_dir.display()))?;
        info!("Created {}/", lookout_dir.display());
    }

    std::fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    info!("Created {}", config_path.display());
    info!("Next steps:");
    info!("  1. Edit .lookout/config.toml to name your service and add alert rules");
    info!("  2. Run 'lookout validate' to check it");
    info!("  3. Run 'lookout demo' to see the monitor in action");
    Ok(())
}

async fn run(config: Config, lookout_dir: PathBuf) -> Result<()> {
    let monitor = Arc::new(build_monitor(&config, &lookout_dir)?);
    info!(
        service = %config.apm.service.name,
        environment = %config.apm.service.environment,
        "Monitor started"
    );

    for rule in config.alert_rules {
        let id = rule.id.clone();
        if let Err(e) = monitor.add_alert_rule(rule).await {
            tracing::warn!(rule = %id, "Failed to install alert rule: {}", e);
        }
    }
    info!("{} alert rules installed", monitor.alerts().list_alert_rules().len());

    let tasks = monitor.spawn_background_tasks();

    signal::ctrl_c().await?;
    info!("Received interrupt, shutting down...");

    tasks.shutdown();
    let report = monitor.run_retention_sweep(chrono::Utc::now()).await;
    info!(?report, "Final retention sweep");
    info!("Lookout stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init_logging(cli.verbose, "info");
            init_config(force)?;
        }

        Commands::Validate => {
            let (config, lookout_dir) = load_config(cli.config.as_ref())?;
            init_logging(cli.verbose, &config.logging.level);

            let errors = config.validate();
            if errors.is_empty() {
                println!("Configuration in {} is valid.", lookout_dir.display());
            } else {
                for error in &errors {
                    println!("  {}", error);
                }
                anyhow::bail!("{} configuration problem(s) found", errors.len());
            }
        }

        Commands::Run => {
            let (config, lookout_dir) = load_config(cli.config.as_ref())?;
            init_file_logging(
                &config.resolve_log_dir(&lookout_dir),
                cli.verbose,
                &config.logging.level,
            );
            let errors = config.validate();
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{}", error);
                }
                anyhow::bail!("{} configuration problem(s) found", errors.len());
            }
            run(config, lookout_dir).await?;
        }

        Commands::Demo {
            requests,
            failure_rate,
        } => {
            let (config, lookout_dir) = load_config(cli.config.as_ref())?;
            init_logging(cli.verbose, &config.logging.level);

            let monitor = build_monitor(&config, &lookout_dir)?;
            let report = demo::run(&monitor, requests, failure_rate).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
