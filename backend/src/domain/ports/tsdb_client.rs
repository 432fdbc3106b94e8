//! Driven port for one time-series database endpoint.
//!
//! One implementor instance represents one TSDB endpoint (source or
//! destination); a worker holds two, never shared across workers, per
//! spec.md §3 ("Ownership").

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::field::{DeclaredType, FieldValue};

/// One row of a query result: a timestamp plus non-null field values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Row timestamp, UTC.
    pub time: DateTime<Utc>,
    /// Field name to value, non-null entries only.
    pub fields: BTreeMap<String, FieldValue>,
}

/// One series (a `(measurement, tag-set)` pair) and its ordered rows.
///
/// Per Design Notes §9, the client exposes this shape rather than a
/// flat row list, so tags survive the round trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesBlock {
    /// Series name (the measurement name as returned by the TSDB).
    pub name: String,
    /// Tag key/value pairs identifying this series.
    pub tags: BTreeMap<String, String>,
    /// Ordered rows for this series.
    pub rows: Vec<Row>,
}

/// Full result of a `query()` call: one block per series.
pub type QueryResult = Vec<SeriesBlock>;

/// A point queued for write, prior to batching.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Measurement name.
    pub measurement: String,
    /// Tag key/value pairs.
    pub tags: BTreeMap<String, String>,
    /// Point timestamp, UTC.
    pub time: DateTime<Utc>,
    /// Non-null field values. Must be non-empty; see spec.md §3.
    pub fields: BTreeMap<String, FieldValue>,
}

define_port_error! {
    /// Errors raised by a TSDB client operation.
    pub enum TsdbError {
        /// The transport round-trip failed (connection refused, reset, DNS,
        /// TLS handshake failure, or a timed-out request). Retryable.
        Unreachable { message: String } =>
            "tsdb endpoint unreachable: {message}",
        /// The query was malformed or rejected by the TSDB. Fatal.
        QueryError { message: String } =>
            "tsdb query failed: {message}",
        /// The destination refused a write batch. Fatal.
        WriteRejected { message: String } =>
            "tsdb write rejected: {message}",
        /// Authentication failed. Fatal.
        AuthFailed { message: String } =>
            "tsdb authentication failed: {message}",
    }
}

impl TsdbError {
    /// Whether the Retry Executor should retry this error.
    ///
    /// Per spec.md §4.1/§7, only `Unreachable` is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Driven port for one TSDB endpoint. Pure I/O; carries no policy.
#[async_trait]
pub trait TsdbClient: Send + Sync {
    /// Check connectivity. Fails with `Unreachable` on transport failure.
    async fn ping(&self) -> Result<(), TsdbError>;

    /// List databases, excluding system databases by TSDB convention.
    async fn list_databases(&self) -> Result<Vec<String>, TsdbError>;

    /// List measurements in a database, in the order the TSDB returns them.
    async fn list_measurements(&self, db: &str) -> Result<Vec<String>, TsdbError>;

    /// Map field name to declared type for a measurement.
    async fn field_keys(
        &self,
        db: &str,
        measurement: &str,
    ) -> Result<BTreeMap<String, DeclaredType>, TsdbError>;

    /// Earliest timestamp at which any of `fields` (or any column, if
    /// `None`) has a non-null value. `None` if the measurement has no
    /// matching data.
    async fn first_timestamp(
        &self,
        db: &str,
        measurement: &str,
        fields: Option<&[String]>,
    ) -> Result<Option<DateTime<Utc>>, TsdbError>;

    /// Latest timestamp at which any of `fields` (or any column, if
    /// `None`) has a non-null value. `None` if the measurement has no
    /// matching data.
    async fn last_timestamp(
        &self,
        db: &str,
        measurement: &str,
        fields: Option<&[String]>,
    ) -> Result<Option<DateTime<Utc>>, TsdbError>;

    /// Run a raw query, returning results grouped by series.
    async fn query(&self, db: &str, query: &str) -> Result<QueryResult, TsdbError>;

    /// Batched insert. Empty input is a no-op.
    async fn write_points(&self, db: &str, points: &[DataPoint]) -> Result<(), TsdbError>;

    /// Idempotent database creation.
    async fn create_database(&self, db: &str) -> Result<(), TsdbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreachable_is_retryable() {
        assert!(TsdbError::unreachable("timeout").is_retryable());
        assert!(!TsdbError::query_error("bad syntax").is_retryable());
        assert!(!TsdbError::write_rejected("schema mismatch").is_retryable());
        assert!(!TsdbError::auth_failed("bad credentials").is_retryable());
    }
}
