#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), forbid(clippy::expect_used))]
//! Orchestrator entry-point: discovers worker configs, spawns one
//! worker process per config, and aggregates their results. Also
//! serves as the worker process itself when invoked with
//! `--worker-config <path>` (see `outbound`'s process-spawn model in
//! DESIGN.md).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use mockable::DefaultClock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Root directory for per-worker rotated log files; relative to the
/// working directory the orchestrator/worker is launched from.
const LOG_DIR: &str = "logs";

use backup_orchestrator::domain::backup_manager::BackupManager;
use backup_orchestrator::domain::config::{BackupMode, WorkerConfig};
use backup_orchestrator::domain::orchestrator::{self, WorkerOutcome};
use backup_orchestrator::domain::scheduler;
use backup_orchestrator::domain::ports::TsdbClient;
use backup_orchestrator::outbound::tsdb::{InfluxHttpClient, InfluxHttpIdentity};

const DEFAULT_CONFIG_DIR: &str = "/config";

/// CLI arguments for the backup orchestrator.
#[derive(Debug, Clone, Parser)]
#[command(name = "backup-orchestrator", about = "TSDB backup orchestrator", version)]
struct CliArgs {
    /// Directory to scan for worker config files.
    #[arg(long = "config", value_name = "dir", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,
    /// Enable debug-level logging.
    #[arg(long = "verbose")]
    verbose: bool,
    /// Validate every discovered config file and exit without running any worker.
    #[arg(long = "validate-only")]
    validate_only: bool,
    /// Internal flag: run as a single worker for this config file, rather
    /// than as the orchestrator. Not intended for direct end-user use.
    #[arg(long = "worker-config", value_name = "path", hide = true)]
    worker_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = CliArgs::parse();
    let worker_name = args.worker_config.as_ref().and_then(|path| path.file_stem()).map(|stem| stem.to_string_lossy().into_owned());
    init_tracing(args.verbose, worker_name.as_deref());

    // A worker runs single-threaded cooperative execution; the
    // orchestrator needs a multi-thread runtime to wait on several
    // child processes and the shutdown signal concurrently.
    let runtime = if args.worker_config.is_some() {
        tokio::runtime::Builder::new_current_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    }
    .wrap_err("failed to build Tokio runtime")?;
    runtime.block_on(async_main(args))
}

/// Installs the global subscriber: a console layer always, plus a
/// per-worker daily-rotated file layer under `logs/<worker_name>/` when
/// running as a worker. Never panics on failure; logs a warning and
/// carries on with whatever subscriber, if any, was already installed,
/// matching the server binary's own `init_tracing` behaviour.
fn init_tracing(verbose: bool, worker_name: Option<&str>) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console_layer = tracing_subscriber::fmt::layer();

    let Some(name) = worker_name else {
        if let Err(error) = tracing_subscriber::registry().with(filter).with(console_layer).try_init() {
            tracing::warn!(%error, "tracing init failed");
        }
        return;
    };

    let log_dir = PathBuf::from(LOG_DIR).join(name);
    if let Err(error) = std::fs::create_dir_all(&log_dir) {
        tracing::warn!(%error, dir = %log_dir.display(), "failed to create worker log directory; file logging disabled");
        if let Err(error) = tracing_subscriber::registry().with(filter).with(console_layer).try_init() {
            tracing::warn!(%error, "tracing init failed");
        }
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the writer thread must outlive `main` for
    // buffered lines to flush, and a worker process lives exactly as
    // long as this `main` does.
    Box::leak(Box::new(guard));
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

    if let Err(error) = tracing_subscriber::registry().with(filter).with(console_layer).with(file_layer).try_init() {
        tracing::warn!(%error, "tracing init failed");
    }
}

async fn async_main(args: CliArgs) -> Result<()> {
    if let Some(worker_config) = args.worker_config {
        return run_as_worker(&worker_config).await;
    }

    if args.validate_only {
        return run_validate_only(&args.config_dir);
    }

    run_as_orchestrator(&args.config_dir).await
}

async fn run_as_worker(config_path: &PathBuf) -> Result<()> {
    let config = WorkerConfig::load(config_path).wrap_err("failed to load worker config")?;
    let source: Arc<dyn TsdbClient> = Arc::new(build_client(&config, true)?);
    let destination: Arc<dyn TsdbClient> = Arc::new(build_client(&config, false)?);
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    let manager = Arc::new(BackupManager::new(config.clone(), source, destination, Arc::new(DefaultClock), shutdown.clone()));

    match (config.options.backup_mode, &config.options.incremental.schedule) {
        (BackupMode::Incremental, Some(cron)) => {
            scheduler::start(
                move || {
                    let manager = Arc::clone(&manager);
                    async move {
                        let result = manager.run().await;
                        print_worker_result(&result);
                    }
                },
                cron,
                &shutdown,
            )
            .await
            .wrap_err("scheduler failed")?;
            Ok(())
        }
        _ => {
            let result = manager.run().await;
            print_worker_result(&result);
            if result.success {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
    }
}

fn print_worker_result(result: &backup_orchestrator::domain::backup_manager::WorkerResult) {
    if let Ok(json) = serde_json::to_string(result) {
        println!("WORKER_RESULT {json}");
    }
}

fn build_client(config: &WorkerConfig, is_source: bool) -> Result<InfluxHttpClient> {
    let endpoint = if is_source { &config.source } else { &config.destination };
    InfluxHttpClient::new(InfluxHttpIdentity {
        url: endpoint.url.clone(),
        username: endpoint.username.clone(),
        password: endpoint.password.clone(),
        verify_ssl: endpoint.verify_ssl,
        timeout: config.options.timeout_client,
    })
    .wrap_err("failed to build TSDB HTTP client")
}

fn run_validate_only(config_dir: &PathBuf) -> Result<()> {
    let configs = orchestrator::discover_configs(config_dir).wrap_err("failed to discover config files")?;
    let mut any_invalid = false;
    for config_path in &configs {
        let message = orchestrator::validate_config(config_path);
        any_invalid = any_invalid || message.starts_with("INVALID");
        println!("{message}");
    }
    if any_invalid {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_as_orchestrator(config_dir: &PathBuf) -> Result<()> {
    let current_exe = env::current_exe().wrap_err("failed to resolve current executable path")?;
    let configs = orchestrator::discover_configs(config_dir).wrap_err("failed to discover config files")?;
    if configs.is_empty() {
        tracing::error!(dir = %config_dir.display(), "no configuration files found");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // One task per config, all spawned before any is awaited: workers run
    // as N concurrent OS processes, matching the process-level parallelism
    // model (spec.md §5), not a sequential scan.
    let handles: Vec<_> = configs
        .into_iter()
        .map(|config_path| {
            let current_exe = current_exe.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                orchestrator::run_worker(&current_exe, &config_path, &shutdown).await.map_err(|error| (config_path, error))
            })
        })
        .collect();

    let mut outcomes: Vec<WorkerOutcome> = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err((config_path, error))) => tracing::error!(config = %config_path.display(), %error, "failed to run worker"),
            Err(error) => tracing::error!(%error, "worker task panicked"),
        }
    }

    orchestrator::log_summary(&outcomes);

    if shutdown.is_cancelled() {
        std::process::exit(130);
    }
    if outcomes.iter().any(|outcome| !outcome.success) {
        std::process::exit(1);
    }
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
        // small grace window lets in-flight workers observe cancellation cleanly.
        tokio::time::sleep(Duration::from_millis(50)).await;
    });
}

#[cfg(test)]
mod tests {
    //! Unit tests for CLI parsing.

    use clap::Parser;
    use rstest::rstest;

    use super::CliArgs;

    #[rstest]
    fn defaults_config_dir_when_not_given() {
        let args = CliArgs::try_parse_from(["backup-orchestrator"]).expect("parse");
        assert_eq!(args.config_dir, std::path::PathBuf::from(super::DEFAULT_CONFIG_DIR));
        assert!(!args.verbose);
        assert!(!args.validate_only);
        assert!(args.worker_config.is_none());
    }

    #[rstest]
    fn parses_validate_only_and_custom_config_dir() {
        let args = CliArgs::try_parse_from(["backup-orchestrator", "--config", "/tmp/configs", "--validate-only"]).expect("parse");
        assert_eq!(args.config_dir, std::path::PathBuf::from("/tmp/configs"));
        assert!(args.validate_only);
    }

    #[rstest]
    fn parses_internal_worker_config_flag() {
        let args = CliArgs::try_parse_from(["backup-orchestrator", "--worker-config", "/config/a.yaml"]).expect("parse");
        assert_eq!(args.worker_config, Some(std::path::PathBuf::from("/config/a.yaml")));
    }
}
