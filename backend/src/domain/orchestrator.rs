//! Config discovery, worker process spawning, and result aggregation.
//!
//! Grounded on `original_source/docker/backup_influxdb/main.py`'s
//! `BackupOrchestrator`: discover `.yaml`/`.yml` config files in a
//! directory (skipping `.template.*` files per spec.md §4.2), validate
//! each, spawn one worker process per valid config, collect results,
//! and print an aggregate summary. Per DESIGN.md's Open Question 3,
//! each worker is a re-exec of this same binary via
//! [`tokio::process::Command`] rather than a `fork()`, so it runs in
//! its own OS process with its own address space.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::backup_manager::WorkerResult;
use crate::domain::config::WorkerConfig;
use crate::domain::error::OrchestratorError;

const CONFIG_EXTENSIONS: [&str; 2] = ["yaml", "yml"];
const TEMPLATE_MARKER: &str = ".template.";
const WORKER_RESULT_PREFIX: &str = "WORKER_RESULT ";

/// The outcome of spawning and waiting on one worker process.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// Config file stem this worker ran.
    pub name: String,
    /// `true` if the worker process exited with status 0.
    pub success: bool,
    /// Captured stderr tail, when `success` is `false`.
    pub error: Option<String>,
    /// The worker's own result, when it printed one on stdout.
    pub stats: Option<WorkerResult>,
}

fn extract_worker_result(stdout: &str) -> Option<WorkerResult> {
    stdout.lines().rev().find_map(|line| line.strip_prefix(WORKER_RESULT_PREFIX)).and_then(|json| serde_json::from_str(json).ok())
}

/// Discovers eligible worker config files under `dir`, sorted by name.
///
/// Files matching `*.template.*` are excluded, per spec.md §4.2 (they
/// exist as documentation/examples, not live configuration).
///
/// # Errors
///
/// Returns [`OrchestratorError::DiscoverConfigs`] if `dir` cannot be read.
pub fn discover_configs(dir: &Path) -> Result<Vec<PathBuf>, OrchestratorError> {
    let entries = std::fs::read_dir(dir).map_err(|source| OrchestratorError::DiscoverConfigs {
        path: dir.display().to_string(),
        source,
    })?;

    let mut configs: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| !path.to_string_lossy().contains(TEMPLATE_MARKER))
        .filter(|path| path.extension().and_then(std::ffi::OsStr::to_str).is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext)))
        .collect();
    configs.sort();
    Ok(configs)
}

/// Validates one config file, returning a human-readable message in
/// the `--validate-only` output format (`OK <path>` / `INVALID <path>: <reason>`).
#[must_use]
pub fn validate_config(path: &Path) -> String {
    match WorkerConfig::load(path) {
        Ok(_) => format!("OK {}", path.display()),
        Err(error) => format!("INVALID {}: {error}", path.display()),
    }
}

/// Spawns one worker process for `config_path` by re-exec'ing the
/// current binary with `--worker-config <config_path>`, and waits for
/// it to finish or for `shutdown` to be cancelled.
///
/// # Errors
///
/// Returns [`OrchestratorError::SpawnWorker`] if the process cannot be
/// spawned.
pub async fn run_worker(current_exe: &Path, config_path: &Path, shutdown: &CancellationToken) -> Result<WorkerOutcome, OrchestratorError> {
    let name = config_path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| config_path.display().to_string());

    let mut child = Command::new(current_exe)
        .arg("--worker-config")
        .arg(config_path)
        .kill_on_drop(true)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| OrchestratorError::SpawnWorker { config: name.clone(), source })?;

    info!(worker = %name, "spawned worker process");

    let mut stdout_pipe = child.stdout.take();
    tokio::select! {
        status = child.wait() => {
            let mut captured = String::new();
            if let Some(mut pipe) = stdout_pipe.take() {
                let _ = pipe.read_to_string(&mut captured).await;
            }
            let stats = extract_worker_result(&captured);
            match status {
                Ok(status) if status.success() => Ok(WorkerOutcome { name, success: true, error: None, stats }),
                Ok(status) => Ok(WorkerOutcome { name, success: false, error: Some(format!("exited with {status}")), stats }),
                Err(source) => Err(OrchestratorError::SpawnWorker { config: name, source }),
            }
        }
        () = shutdown.cancelled() => {
            warn!(worker = %name, "shutdown requested; terminating worker");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(WorkerOutcome { name, success: false, error: Some("shutdown requested".to_owned()), stats: None })
        }
    }
}

/// Logs an aggregate summary across all worker outcomes, mirroring the
/// original orchestrator's banner-delimited summary block.
pub fn log_summary(outcomes: &[WorkerOutcome]) {
    let successful = outcomes.iter().filter(|outcome| outcome.success).count();
    let failed = outcomes.len() - successful;
    let total_databases: u64 = outcomes.iter().filter_map(|outcome| outcome.stats.as_ref()).map(|stats| stats.databases).sum();
    let total_measurements: u64 = outcomes.iter().filter_map(|outcome| outcome.stats.as_ref()).map(|stats| stats.measurements).sum();
    let total_records: u64 = outcomes.iter().filter_map(|outcome| outcome.stats.as_ref()).map(|stats| stats.records).sum();

    info!("{}", "=".repeat(60));
    info!("BACKUP SUMMARY");
    info!("{}", "=".repeat(60));
    info!(total = outcomes.len(), successful, failed, "worker totals");
    info!(total_databases, total_measurements, total_records, "transfer totals");

    for outcome in outcomes.iter().filter(|outcome| !outcome.success) {
        error!(worker = %outcome.name, error = outcome.error.as_deref().unwrap_or("unknown error"), "worker failed");
    }
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discovers_yaml_and_yml_but_not_templates() {
        let dir = tempdir().expect("tempdir");
        for name in ["a.yaml", "b.yml", "c.template.yaml", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        let found = discover_configs(dir.path()).expect("discover");
        let names: Vec<_> = found.iter().filter_map(|path| path.file_name()).map(|name| name.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.yaml".to_owned(), "b.yml".to_owned()]);
    }

    #[test]
    fn discover_configs_errors_on_missing_directory() {
        let result = discover_configs(Path::new("/nonexistent/definitely/not/here"));
        assert!(matches!(result, Err(OrchestratorError::DiscoverConfigs { .. })));
    }

    #[test]
    fn validate_config_reports_invalid_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "not: [valid").expect("write");
        let message = validate_config(&path);
        assert!(message.starts_with("INVALID"));
    }
}
