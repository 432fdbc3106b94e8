//! Scheduling a worker's recurring run, or running it once.
//!
//! Grounded on `original_source/docker/backup_influxdb/src/scheduler.py`'s
//! `Scheduler`/`run_job_once`: a cron-driven repeating job, or a single
//! one-shot invocation, both logging and swallowing the job's own
//! errors rather than letting them escape (the job itself is
//! responsible for reporting failure through its `WorkerResult`).
//! Runs on `tokio-cron-scheduler` rather than a dedicated blocking
//! scheduler thread, since the whole pipeline is already `tokio`-native.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Errors raised while building or starting a cron schedule.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The cron expression could not be parsed.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron {
        /// The offending expression.
        expression: String,
        /// Underlying parser message.
        message: String,
    },
    /// The scheduler itself failed to start or register the job.
    #[error("failed to start scheduler: {message}")]
    SchedulerFailed {
        /// Underlying failure message.
        message: String,
    },
}

/// Runs `job` exactly once, logging success or failure. Never returns
/// an error: per spec.md §4.5, a failed one-shot run is reported
/// through its own result, not propagated to the caller.
pub async fn run_once<F, Fut>(job: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    info!("running backup job once");
    job().await;
}

/// Starts `job` on a recurring cron schedule and blocks until `shutdown`
/// is cancelled.
///
/// `shutdown` is checked at the top of every tick (skipping that tick's
/// run rather than starting it once cancellation has been requested) and
/// as the loop boundary that ends the `start` future itself, per spec.md
/// §5's "checked... between scheduler ticks".
///
/// # Errors
///
/// Returns [`ScheduleError`] if `cron_expression` is invalid or the
/// scheduler fails to start.
pub async fn start<F, Fut>(job: F, cron_expression: &str, shutdown: &CancellationToken) -> Result<(), ScheduleError>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let scheduler = JobScheduler::new().await.map_err(|error| ScheduleError::SchedulerFailed { message: error.to_string() })?;
    let job = Arc::new(job);
    let tick_shutdown = shutdown.clone();
    let scheduled_job = Job::new_async(cron_expression, move |_uuid, _lock| {
        let job = Arc::clone(&job);
        let shutdown = tick_shutdown.clone();
        Box::pin(async move {
            if shutdown.is_cancelled() {
                info!("shutdown requested; skipping scheduled tick");
                return;
            }
            job().await;
        })
    })
    .map_err(|error| ScheduleError::InvalidCron { expression: cron_expression.to_owned(), message: error.to_string() })?;

    scheduler
        .add(scheduled_job)
        .await
        .map_err(|error| ScheduleError::SchedulerFailed { message: error.to_string() })?;

    info!(cron_expression, "scheduler starting");
    scheduler.start().await.map_err(|error| {
        error!(%error, "scheduler failed to start");
        ScheduleError::SchedulerFailed { message: error.to_string() }
    })?;

    shutdown.cancelled().await;
    info!("shutdown requested; stopping scheduler");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn run_once_invokes_the_job_exactly_once() {
        let calls = AtomicU32::new(0);
        run_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let shutdown = CancellationToken::new();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            start(|| async {}, "not a cron expression", &shutdown),
        )
        .await;
        match result {
            Ok(Err(ScheduleError::InvalidCron { .. })) => {}
            Ok(Err(other)) => panic!("expected InvalidCron, got {other:?}"),
            Ok(Ok(())) => panic!("expected the invalid expression to be rejected"),
            Err(_) => panic!("start() should fail fast on an invalid expression, not hang"),
        }
    }

    #[tokio::test]
    async fn start_returns_once_shutdown_is_cancelled() {
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            shutdown_for_task.cancel();
        });
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            start(|| async {}, "0 0 0 * * *", &shutdown),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
