//! Worker configuration loading, environment substitution, and validation.
//!
//! Grounded on `original_source/docker/backup_influxdb/src/config.py`
//! (YAML load, required-key validation, dotted-path `get`) and
//! `conf.py` (option defaults), reworked per Design Notes §9 into an
//! explicit, immutable struct passed into constructors — no
//! module-level singleton.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::duration::parse_duration;
use crate::domain::error::ConfigError;
use crate::domain::field::NormalizedType;

const DEFAULT_DAYS_OF_PAGINATION: u32 = 7;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;
const DEFAULT_TIMEOUT_CLIENT_SECONDS: u64 = 20;

/// One TSDB endpoint (source or destination).
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Base URL of the TSDB HTTP API.
    pub url: String,
    /// Basic-auth username, if configured.
    pub username: Option<String>,
    /// Basic-auth password, if configured.
    pub password: Option<String>,
    /// Whether to verify TLS certificates. Defaults to `true`.
    pub verify_ssl: bool,
}

/// A `(source_db, dest_db)` pairing processed sequentially within a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMapping {
    /// Source database name.
    pub source_db: String,
    /// Destination database name.
    pub dest_db: String,
}

/// Dispatch mode for the backup run, per spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Copy an explicit `[start, end]` range once.
    Range,
    /// Resume from the destination's last point, optionally cron-scheduled.
    Incremental,
}

/// Bounds for `backup_mode = range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBounds {
    /// Inclusive-ish start of the configured range (see pagination rules).
    pub start_date: DateTime<Utc>,
    /// End of the configured range.
    pub end_date: DateTime<Utc>,
}

/// Options for `backup_mode = incremental`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncrementalOptions {
    /// Cron expression; `None` means one-shot incremental.
    pub schedule: Option<String>,
    /// Skip a measurement if its last destination timestamp is older
    /// than `now_utc - obsolete_threshold`.
    pub obsolete_threshold: Option<Duration>,
}

/// Per-measurement field filtering, per spec.md §4.2's `measurements.specific.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldFilter {
    /// Normalized types to retain; empty means "all three".
    pub types: HashSet<NormalizedType>,
    /// Field-level whitelist; dominates `exclude` when non-empty.
    pub include: Vec<String>,
    /// Field-level blacklist.
    pub exclude: Vec<String>,
}

impl FieldFilter {
    fn all_types() -> HashSet<NormalizedType> {
        HashSet::from([
            NormalizedType::Numeric,
            NormalizedType::Str,
            NormalizedType::Bool,
        ])
    }

    /// Effective type set: configured types, or all three if unset.
    #[must_use]
    pub fn effective_types(&self) -> HashSet<NormalizedType> {
        if self.types.is_empty() {
            Self::all_types()
        } else {
            self.types.clone()
        }
    }
}

/// Global and per-measurement measurement/field filtering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementFilter {
    /// Global measurement whitelist; dominates `exclude` when non-empty.
    pub include: Vec<String>,
    /// Global measurement blacklist.
    pub exclude: Vec<String>,
    /// Per-measurement field filter overrides.
    pub specific: BTreeMap<String, FieldFilter>,
}

impl MeasurementFilter {
    /// The [`FieldFilter`] for `measurement`, or an empty default
    /// (all types, no include/exclude) if none is configured.
    #[must_use]
    pub fn field_filter_for(&self, measurement: &str) -> FieldFilter {
        self.specific.get(measurement).cloned().unwrap_or_default()
    }
}

/// Tunable knobs under `options`, per spec.md §4.2's key table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// `range` or `incremental`.
    pub backup_mode: BackupMode,
    /// Required when `backup_mode = range`.
    pub range: Option<RangeBounds>,
    /// Used when `backup_mode = incremental`.
    pub incremental: IncrementalOptions,
    /// Per-field obsolescence threshold, applied before computing the
    /// active field set.
    pub field_obsolete_threshold: Option<Duration>,
    /// Page width in days. Defaults to 7.
    pub days_of_pagination: u32,
    /// Retry budget. Defaults to 3.
    pub retries: u32,
    /// Delay between retries. Defaults to 5s.
    pub retry_delay: Duration,
    /// Transport timeout. Defaults to 20s.
    pub timeout_client: Duration,
    /// Optional `GROUP BY time(<dur>)` aggregation token.
    pub group_by: Option<String>,
}

/// A fully loaded, validated, immutable worker configuration.
///
/// Per Design Notes §9, this replaces the source's module-level
/// configuration singleton: one instance is constructed per worker and
/// passed explicitly into the Config Loader's callers.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Stem of the config file this worker was loaded from (used for
    /// logging and the worker's result name).
    pub name: String,
    /// Source TSDB endpoint.
    pub source: Endpoint,
    /// Destination TSDB endpoint.
    pub destination: Endpoint,
    /// Database mappings, processed sequentially.
    pub mappings: Vec<DatabaseMapping>,
    /// Measurement and field filtering configuration.
    pub measurements: MeasurementFilter,
    /// Tunable run options.
    pub options: Options,
}

impl WorkerConfig {
    /// Load, environment-substitute, parse, and validate a worker
    /// config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not
    /// valid YAML, is missing a required key, or holds an invalid
    /// enum/range value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        let substituted = substitute_env(&raw);
        let dto: RawConfigDto =
            serde_yaml::from_str(&substituted).map_err(|error| ConfigError::Parse {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        dto.into_worker_config(name)
    }
}

/// Substitute `${NAME}`, `$NAME`, and `${NAME:-default}` placeholders
/// against the process environment.
///
/// An unset variable with no default substitutes to an empty string,
/// matching shell `${VAR}` expansion of an unset, non-`nounset`
/// variable.
#[must_use]
pub fn substitute_env(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let bytes = input.as_bytes();

    while let Some((index, ch)) = chars.next() {
        if ch != '$' {
            output.push(ch);
            continue;
        }
        match chars.peek() {
            Some(&(brace_index, '{')) => {
                chars.next();
                if let Some(close) = input[brace_index + 1..].find('}') {
                    let inner = &input[brace_index + 1..brace_index + 1 + close];
                    output.push_str(&resolve_placeholder(inner));
                    for _ in 0..=close {
                        chars.next();
                    }
                } else {
                    output.push_str(&input[index..]);
                    break;
                }
            }
            Some(&(name_start, c)) if is_ident_start(c) => {
                let mut end = name_start;
                while let Some(&(pos, c)) = chars.peek() {
                    if is_ident_continue(c) {
                        end = pos + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &bytes_to_str(bytes, name_start, end);
                output.push_str(&std::env::var(name).unwrap_or_default());
            }
            _ => output.push('$'),
        }
    }
    output
}

fn bytes_to_str(bytes: &[u8], start: usize, end: usize) -> String {
    String::from_utf8_lossy(&bytes[start..end]).into_owned()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn resolve_placeholder(inner: &str) -> String {
    match inner.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_owned()),
        None => std::env::var(inner).unwrap_or_default(),
    }
}

#[derive(Debug, Deserialize)]
struct EndpointDto {
    url: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "default_true")]
    verify_ssl: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DatabaseMappingDto {
    name: String,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct SourceDto {
    #[serde(flatten)]
    endpoint: EndpointDto,
    #[serde(default)]
    databases: Vec<DatabaseMappingDto>,
    group_by: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FieldFilterDto {
    #[serde(default)]
    types: Vec<NormalizedType>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpecificMeasurementDto {
    #[serde(default)]
    fields: FieldFilterDto,
}

#[derive(Debug, Deserialize, Default)]
struct MeasurementsDto {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    specific: BTreeMap<String, SpecificMeasurementDto>,
}

#[derive(Debug, Deserialize)]
struct RangeDto {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
struct IncrementalDto {
    schedule: Option<String>,
    obsolete_threshold: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OptionsDto {
    backup_mode: String,
    range: Option<RangeDto>,
    #[serde(default)]
    incremental: IncrementalDto,
    field_obsolete_threshold: Option<String>,
    days_of_pagination: Option<u32>,
    retries: Option<u32>,
    retry_delay: Option<u64>,
    timeout_client: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawConfigDto {
    source: SourceDto,
    destination: EndpointDto,
    #[serde(default)]
    measurements: MeasurementsDto,
    options: OptionsDto,
}

impl RawConfigDto {
    fn into_worker_config(self, name: String) -> Result<WorkerConfig, ConfigError> {
        if self.source.databases.is_empty() {
            return Err(ConfigError::MissingKey {
                key: "source.databases".to_owned(),
            });
        }

        let backup_mode = match self.options.backup_mode.as_str() {
            "range" => BackupMode::Range,
            "incremental" => BackupMode::Incremental,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "options.backup_mode".to_owned(),
                    message: format!("expected 'range' or 'incremental', got '{other}'"),
                });
            }
        };

        let range = match (backup_mode, self.options.range) {
            (BackupMode::Range, Some(range)) => Some(RangeBounds {
                start_date: range.start_date,
                end_date: range.end_date,
            }),
            (BackupMode::Range, None) => {
                return Err(ConfigError::MissingKey {
                    key: "options.range".to_owned(),
                });
            }
            (BackupMode::Incremental, range) => range.map(|range| RangeBounds {
                start_date: range.start_date,
                end_date: range.end_date,
            }),
        };

        let field_obsolete_threshold = parse_optional_duration(
            "options.field_obsolete_threshold",
            self.options.field_obsolete_threshold.as_deref(),
        );
        let incremental_obsolete_threshold = parse_optional_duration(
            "options.incremental.obsolete_threshold",
            self.options.incremental.obsolete_threshold.as_deref(),
        );

        let mappings = self
            .source
            .databases
            .into_iter()
            .map(|mapping| DatabaseMapping {
                source_db: mapping.name,
                dest_db: mapping.destination,
            })
            .collect();

        let measurements = MeasurementFilter {
            include: self.measurements.include,
            exclude: self.measurements.exclude,
            specific: self
                .measurements
                .specific
                .into_iter()
                .map(|(name, dto)| {
                    (
                        name,
                        FieldFilter {
                            types: dto.fields.types.into_iter().collect(),
                            include: dto.fields.include,
                            exclude: dto.fields.exclude,
                        },
                    )
                })
                .collect(),
        };

        Ok(WorkerConfig {
            name,
            source: Endpoint {
                url: self.source.endpoint.url,
                username: self.source.endpoint.username,
                password: self.source.endpoint.password,
                verify_ssl: self.source.endpoint.verify_ssl,
            },
            destination: Endpoint {
                url: self.destination.url,
                username: self.destination.username,
                password: self.destination.password,
                verify_ssl: self.destination.verify_ssl,
            },
            mappings,
            measurements,
            options: Options {
                backup_mode,
                range,
                incremental: IncrementalOptions {
                    schedule: self.options.incremental.schedule,
                    obsolete_threshold: incremental_obsolete_threshold,
                },
                field_obsolete_threshold,
                days_of_pagination: self
                    .options
                    .days_of_pagination
                    .unwrap_or(DEFAULT_DAYS_OF_PAGINATION),
                retries: self.options.retries.unwrap_or(DEFAULT_RETRIES),
                retry_delay: Duration::from_secs(
                    self.options
                        .retry_delay
                        .unwrap_or(DEFAULT_RETRY_DELAY_SECONDS),
                ),
                timeout_client: Duration::from_secs(
                    self.options
                        .timeout_client
                        .unwrap_or(DEFAULT_TIMEOUT_CLIENT_SECONDS),
                ),
                group_by: self.source.group_by,
            },
        })
    }
}

/// Parse an optional duration string, logging and disabling the filter
/// (returning `None`) rather than failing the worker on bad input, per
/// spec.md §4.4's duration-parsing rule.
fn parse_optional_duration(key: &str, raw: Option<&str>) -> Option<Duration> {
    let raw = raw?;
    let parsed = parse_duration(raw);
    if parsed.is_none() {
        tracing::warn!(key, raw, "unparsable duration; disabling this filter");
    }
    parsed
}

impl<'de> Deserialize<'de> for NormalizedType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "numeric" => Ok(Self::Numeric),
            "string" => Ok(Self::Str),
            "boolean" => Ok(Self::Bool),
            other => Err(serde::de::Error::custom(format!(
                "unknown field type '{other}'; expected numeric, string, or boolean"
            ))),
        }
    }
}
