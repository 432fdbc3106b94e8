//! Backup Manager: the policy core driving one worker's transfer of
//! configured databases from source to destination TSDB.
//!
//! Grounded on `original_source/.../src/backup.py`'s `BackupManager`
//! class, split into submodules the way the teacher splits
//! `overpass_enrichment_worker/{mod.rs,policy.rs,attempt_error.rs,runtime.rs}`:
//! this file holds the I/O-driving orchestration, `policy` holds pure
//! filtering/resume decisions, `pagination`/`query`/`transform` hold
//! the per-window mechanics, and `state` names the per-measurement
//! state machine these methods walk through.

pub mod pagination;
pub mod policy;
pub mod query;
pub mod state;
mod transform;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::config::{BackupMode, DatabaseMapping, WorkerConfig};
use crate::domain::error::BackupError;
use crate::domain::ports::tsdb_client::TsdbClient;
use crate::domain::retry::RetryExecutor;
use state::MeasurementState;

/// Outcome of one worker's run, consumed by the orchestrator's aggregator.
///
/// Serializable: a worker process prints this as a single JSON line on
/// stdout (prefixed with `WORKER_RESULT `) so the orchestrator process
/// can aggregate stats across worker processes, per spec.md §4.6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Worker name (the config file's stem).
    pub name: String,
    /// `true` unless the run was aborted by a fatal error.
    pub success: bool,
    /// Error message, when `success` is `false`.
    pub error: Option<String>,
    /// UTC start time of the run.
    pub start_time: DateTime<Utc>,
    /// UTC end time of the run.
    pub end_time: DateTime<Utc>,
    /// Number of database mappings processed.
    pub databases: u64,
    /// Number of measurements transferred (non-skipped).
    pub measurements: u64,
    /// Total points written, summed across all pages.
    pub records: u64,
}

fn advance(from: MeasurementState, to: MeasurementState) -> MeasurementState {
    debug_assert!(from.can_transition_to(to), "illegal measurement state transition {from:?} -> {to:?}");
    to
}

#[derive(Debug, Default)]
struct Counters {
    databases: u64,
    measurements: u64,
    records: u64,
}

/// Drives one worker's database transfer against its two [`TsdbClient`] ports.
pub struct BackupManager {
    config: WorkerConfig,
    source: Arc<dyn TsdbClient>,
    destination: Arc<dyn TsdbClient>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl BackupManager {
    /// Builds a manager from a loaded configuration and its two ports.
    ///
    /// `shutdown` is checked at the top of the mapping loop, the
    /// measurement loop, and the pagination-window loop, per spec.md §5
    /// ("checked between stages in a worker").
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        source: Arc<dyn TsdbClient>,
        destination: Arc<dyn TsdbClient>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        let retry = RetryExecutor::new(config.options.retries, config.options.retry_delay);
        Self { config, source, destination, retry, clock, shutdown }
    }

    /// Runs one backup pass over every configured database mapping.
    #[instrument(skip(self), fields(worker = %self.config.name))]
    pub async fn run(&self) -> WorkerResult {
        let start_time = self.clock.utc();
        let mut counters = Counters::default();
        let outcome = self.process_mappings(&mut counters).await;
        let end_time = self.clock.utc();
        match outcome {
            Ok(()) => WorkerResult {
                name: self.config.name.clone(),
                success: true,
                error: None,
                start_time,
                end_time,
                databases: counters.databases,
                measurements: counters.measurements,
                records: counters.records,
            },
            Err(error) => {
                warn!(worker = %self.config.name, %error, "worker run failed");
                WorkerResult {
                    name: self.config.name.clone(),
                    success: false,
                    error: Some(error.to_string()),
                    start_time,
                    end_time,
                    databases: counters.databases,
                    measurements: counters.measurements,
                    records: counters.records,
                }
            }
        }
    }

    async fn process_mappings(&self, counters: &mut Counters) -> Result<(), BackupError> {
        for mapping in &self.config.mappings {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested; stopping before the next mapping");
                break;
            }

            if let Err(error) = self.destination.create_database(&mapping.dest_db).await {
                warn!(dest_db = %mapping.dest_db, %error, "failed to create destination database; skipping this mapping");
                continue;
            }
            counters.databases += 1;

            let all_measurements = self.source.list_measurements(&mapping.source_db).await?;
            let selected = policy::filter_measurements(
                &all_measurements,
                &self.config.measurements.include,
                &self.config.measurements.exclude,
            );

            for measurement in selected {
                if self.shutdown.is_cancelled() {
                    info!("shutdown requested; stopping before the next measurement");
                    break;
                }

                match self.process_measurement(mapping, &measurement).await {
                    Ok(Some(written)) => {
                        counters.measurements += 1;
                        counters.records += written;
                    }
                    Ok(None) => {
                        info!(measurement, "skipped");
                    }
                    Err(error) => {
                        warn!(measurement, %error, "measurement transfer failed; continuing with the next one");
                    }
                }
            }
        }
        Ok(())
    }

    /// Transfers one measurement. Returns `Ok(None)` when skipped,
    /// `Ok(Some(written))` on success, or an error on a fatal failure
    /// that should not abort the rest of the run.
    async fn process_measurement(
        &self,
        mapping: &DatabaseMapping,
        measurement: &str,
    ) -> Result<Option<u64>, BackupError> {
        let now = self.clock.utc();

        let field_keys = self.source.field_keys(&mapping.source_db, measurement).await?;
        let filter = self.config.measurements.field_filter_for(measurement);
        let mut active_fields = policy::select_active_fields(&field_keys, &filter);

        if let Some(threshold) = self.config.options.field_obsolete_threshold {
            active_fields = self.drop_obsolete_fields(mapping, measurement, active_fields, now, threshold).await?;
        }

        let state = MeasurementState::Start;
        if active_fields.is_empty() {
            debug_assert!(state.can_transition_to(MeasurementState::Skipped));
            return Ok(None);
        }
        let state = advance(state, MeasurementState::FieldResolved);

        let (t_start, t_end, skip) = self.resolve_window_bounds(mapping, measurement, &active_fields, now).await?;
        if skip {
            debug_assert!(state.can_transition_to(MeasurementState::Skipped));
            return Ok(None);
        }
        let state = advance(state, MeasurementState::ResumeResolved);
        let state = advance(state, MeasurementState::Paginating);
        debug_assert_eq!(state, MeasurementState::Paginating);

        let windows = pagination::paginate(t_start, t_end, self.config.options.days_of_pagination, now);
        let mut written = 0u64;
        for window in windows {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested; stopping before the next page");
                break;
            }

            let query_str = query::build_query(measurement, &active_fields, &window, self.config.options.group_by.as_deref());
            let result = self
                .retry
                .execute(|| async { self.source.query(&mapping.source_db, &query_str).await.map_err(BackupError::from) })
                .await?;
            let points = transform::transform_query_result(result, measurement, &active_fields);
            if points.is_empty() {
                continue;
            }
            self.retry
                .execute(|| async { self.destination.write_points(&mapping.dest_db, &points).await.map_err(BackupError::from) })
                .await?;
            written += points.len() as u64;
        }
        Ok(Some(written))
    }

    async fn drop_obsolete_fields(
        &self,
        mapping: &DatabaseMapping,
        measurement: &str,
        fields: Vec<String>,
        now: DateTime<Utc>,
        threshold: std::time::Duration,
    ) -> Result<Vec<String>, BackupError> {
        let mut retained = Vec::with_capacity(fields.len());
        for field in fields {
            let last = self
                .destination
                .last_timestamp(&mapping.dest_db, measurement, Some(std::slice::from_ref(&field)))
                .await?;
            if policy::is_obsolete(last, now, Some(threshold)) {
                info!(measurement, field, "dropping obsolete field");
                continue;
            }
            retained.push(field);
        }
        Ok(retained)
    }

    async fn resolve_window_bounds(
        &self,
        mapping: &DatabaseMapping,
        measurement: &str,
        active_fields: &[String],
        now: DateTime<Utc>,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, bool), BackupError> {
        match self.config.options.backup_mode {
            BackupMode::Range => {
                let bounds = self.config.options.range.ok_or_else(|| BackupError::InvalidConfig {
                    message: "backup_mode is 'range' but options.range is absent".to_owned(),
                })?;
                Ok((Some(bounds.start_date), Some(bounds.end_date), false))
            }
            BackupMode::Incremental => {
                let t_last = self.destination.last_timestamp(&mapping.dest_db, measurement, Some(active_fields)).await?;
                let t_first = if t_last.is_none() {
                    self.source.first_timestamp(&mapping.source_db, measurement, Some(active_fields)).await?
                } else {
                    None
                };
                let decision =
                    policy::resolve_resume_start(t_last, t_first, now, self.config.options.incremental.obsolete_threshold);
                let end = self.config.options.range.map(|bounds| bounds.end_date);
                Ok((decision.start, end, decision.skip))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{Endpoint, IncrementalOptions, MeasurementFilter, Options};
    use crate::domain::field::DeclaredType;
    use crate::domain::ports::tsdb_client::{DataPoint, QueryResult, Row, SeriesBlock, TsdbError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockable::DefaultClock;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeClient {
        databases: Vec<String>,
        measurements: Vec<String>,
        fields: BTreeMap<String, DeclaredType>,
        last_timestamp: Option<DateTime<Utc>>,
        query_result: QueryResult,
        written: Mutex<Vec<DataPoint>>,
        fail_create_for: Option<String>,
    }

    impl Default for FakeClient {
        fn default() -> Self {
            Self {
                databases: vec![],
                measurements: vec!["cpu".to_owned()],
                fields: BTreeMap::from([("usage".to_owned(), DeclaredType::Float)]),
                last_timestamp: None,
                query_result: vec![],
                written: Mutex::new(vec![]),
                fail_create_for: None,
            }
        }
    }

    #[async_trait]
    impl TsdbClient for FakeClient {
        async fn ping(&self) -> Result<(), TsdbError> {
            Ok(())
        }
        async fn list_databases(&self) -> Result<Vec<String>, TsdbError> {
            Ok(self.databases.clone())
        }
        async fn list_measurements(&self, _db: &str) -> Result<Vec<String>, TsdbError> {
            Ok(self.measurements.clone())
        }
        async fn field_keys(&self, _db: &str, _measurement: &str) -> Result<BTreeMap<String, DeclaredType>, TsdbError> {
            Ok(self.fields.clone())
        }
        async fn first_timestamp(
            &self,
            _db: &str,
            _measurement: &str,
            _fields: Option<&[String]>,
        ) -> Result<Option<DateTime<Utc>>, TsdbError> {
            Ok(None)
        }
        async fn last_timestamp(
            &self,
            _db: &str,
            _measurement: &str,
            _fields: Option<&[String]>,
        ) -> Result<Option<DateTime<Utc>>, TsdbError> {
            Ok(self.last_timestamp)
        }
        async fn query(&self, _db: &str, _query: &str) -> Result<QueryResult, TsdbError> {
            Ok(self.query_result.clone())
        }
        async fn write_points(&self, _db: &str, points: &[DataPoint]) -> Result<(), TsdbError> {
            self.written.lock().expect("lock").extend_from_slice(points);
            Ok(())
        }
        async fn create_database(&self, db: &str) -> Result<(), TsdbError> {
            if self.fail_create_for.as_deref() == Some(db) {
                return Err(TsdbError::unreachable("simulated create failure"));
            }
            Ok(())
        }
    }

    fn config(mode: BackupMode) -> WorkerConfig {
        config_with_mappings(mode, vec![DatabaseMapping { source_db: "src_db".to_owned(), dest_db: "dst_db".to_owned() }])
    }

    fn config_with_mappings(mode: BackupMode, mappings: Vec<DatabaseMapping>) -> WorkerConfig {
        WorkerConfig {
            name: "test".to_owned(),
            source: Endpoint { url: "http://src".to_owned(), username: None, password: None, verify_ssl: true },
            destination: Endpoint { url: "http://dst".to_owned(), username: None, password: None, verify_ssl: true },
            mappings,
            measurements: MeasurementFilter::default(),
            options: Options {
                backup_mode: mode,
                range: match mode {
                    BackupMode::Range => Some(crate::domain::config::RangeBounds {
                        start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                        end_date: Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
                    }),
                    BackupMode::Incremental => None,
                },
                incremental: IncrementalOptions::default(),
                field_obsolete_threshold: None,
                days_of_pagination: 7,
                retries: 1,
                retry_delay: Duration::from_millis(0),
                timeout_client: Duration::from_secs(1),
                group_by: None,
            },
        }
    }

    #[tokio::test]
    async fn skips_measurement_with_no_source_data_in_incremental_mode() {
        let source = Arc::new(FakeClient::default());
        let destination = Arc::new(FakeClient::default());
        let manager = BackupManager::new(config(BackupMode::Incremental), source, destination, Arc::new(DefaultClock), CancellationToken::new());
        let result = manager.run().await;
        assert!(result.success);
        assert_eq!(result.measurements, 0);
    }

    #[tokio::test]
    async fn writes_transformed_points_in_range_mode() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut source = FakeClient::default();
        source.query_result = vec![SeriesBlock {
            name: "cpu".to_owned(),
            tags: BTreeMap::new(),
            rows: vec![Row { time: now, fields: BTreeMap::from([("usage".to_owned(), crate::domain::field::FieldValue::Float(1.0))]) }],
        }];
        let destination = FakeClient::default();
        let manager = BackupManager::new(
            config(BackupMode::Range),
            Arc::new(source),
            Arc::new(destination),
            Arc::new(DefaultClock),
            CancellationToken::new(),
        );
        let result = manager.run().await;
        assert!(result.success);
        assert_eq!(result.measurements, 1);
        assert!(result.records >= 1);
    }

    #[tokio::test]
    async fn create_database_failure_skips_only_that_mapping() {
        let source = Arc::new(FakeClient::default());
        let mut destination = FakeClient::default();
        destination.fail_create_for = Some("bad_dst".to_owned());
        let mappings = vec![
            DatabaseMapping { source_db: "src_db".to_owned(), dest_db: "bad_dst".to_owned() },
            DatabaseMapping { source_db: "src_db".to_owned(), dest_db: "good_dst".to_owned() },
        ];
        let manager = BackupManager::new(
            config_with_mappings(BackupMode::Incremental, mappings),
            source,
            Arc::new(destination),
            Arc::new(DefaultClock),
            CancellationToken::new(),
        );
        let result = manager.run().await;
        assert!(result.success);
        assert_eq!(result.databases, 1);
    }
}
