//! Reqwest-backed adapter implementing [`TsdbClient`] against an
//! InfluxDB 1.x-style HTTP API.
//!
//! Grounded on `outbound/overpass/http_source.rs`'s adapter shape
//! (transport owns serialisation, status mapping, and decoding only)
//! and `influx_client.py`'s endpoint semantics: `GET /ping`,
//! `GET /query?db=<db>&q=<query>`, `POST /write?db=<db>` with
//! line-protocol bodies, basic auth, and an optional TLS verification
//! toggle.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::dto::QueryResponseDto;
use crate::domain::field::{DeclaredType, FieldValue};
use crate::domain::ports::tsdb_client::{DataPoint, QueryResult, Row, SeriesBlock, TsdbClient, TsdbError};

const DEFAULT_USER_AGENT: &str = "backup-orchestrator/0.1";

/// Credentials and endpoint identity for one TSDB HTTP connection.
pub struct InfluxHttpIdentity {
    /// Base URL, e.g. `http://influx:8086`.
    pub url: String,
    /// Basic-auth username.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A [`TsdbClient`] implementation backed by one InfluxDB 1.x HTTP endpoint.
pub struct InfluxHttpClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl InfluxHttpClient {
    /// Builds an adapter from connection identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest` client cannot be constructed.
    pub fn new(identity: InfluxHttpIdentity) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(identity.timeout)
            .danger_accept_invalid_certs(!identity.verify_ssl)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: identity.url.trim_end_matches('/').to_owned(),
            username: identity.username,
            password: identity.password,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.password) {
            (Some(username), password) => builder.basic_auth(username, password.as_deref()),
            _ => builder,
        }
    }

    async fn run_query(&self, db: &str, query: &str) -> Result<QueryResponseDto, TsdbError> {
        let url = format!("{}/query", self.base_url);
        let request = self.request(self.client.get(&url).query(&[("db", db), ("q", query)]));
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, &body, true));
        }
        let decoded: QueryResponseDto = serde_json::from_slice(&body).map_err(|error| TsdbError::query_error(format!("invalid query response: {error}")))?;
        for statement in &decoded.results {
            if let Some(message) = &statement.error {
                return Err(TsdbError::query_error(message.clone()));
            }
        }
        Ok(decoded)
    }

    fn first_series_points(decoded: QueryResponseDto) -> Vec<BTreeMap<String, Value>> {
        let Some(statement) = decoded.results.into_iter().next() else {
            return Vec::new();
        };
        let Some(series) = statement.series.into_iter().next() else {
            return Vec::new();
        };
        series
            .values
            .into_iter()
            .map(|row| series.columns.iter().cloned().zip(row).collect())
            .collect()
    }
}

#[async_trait]
impl TsdbClient for InfluxHttpClient {
    async fn ping(&self) -> Result<(), TsdbError> {
        let url = format!("{}/ping", self.base_url);
        let response = self.request(self.client.get(&url)).send().await.map_err(map_transport_error)?;
        if response.status().is_success() || response.status() == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(map_status_error(response.status(), &[], false))
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>, TsdbError> {
        let decoded = self.run_query("", "SHOW DATABASES").await?;
        Ok(Self::first_series_points(decoded)
            .into_iter()
            .filter_map(|mut row| row.remove("name"))
            .filter_map(|value| value.as_str().map(str::to_owned))
            .collect())
    }

    async fn list_measurements(&self, db: &str) -> Result<Vec<String>, TsdbError> {
        let decoded = self.run_query(db, "SHOW MEASUREMENTS").await?;
        Ok(Self::first_series_points(decoded)
            .into_iter()
            .filter_map(|mut row| row.remove("name"))
            .filter_map(|value| value.as_str().map(str::to_owned))
            .collect())
    }

    async fn field_keys(&self, db: &str, measurement: &str) -> Result<BTreeMap<String, DeclaredType>, TsdbError> {
        let query = format!("SHOW FIELD KEYS FROM \"{measurement}\"");
        let decoded = self.run_query(db, &query).await?;
        let mut fields = BTreeMap::new();
        for mut row in Self::first_series_points(decoded) {
            let Some(key) = row.remove("fieldKey").and_then(|value| value.as_str().map(str::to_owned)) else {
                continue;
            };
            let Some(declared) = row.remove("fieldType").and_then(|value| value.as_str().and_then(DeclaredType::parse)) else {
                continue;
            };
            fields.insert(key, declared);
        }
        Ok(fields)
    }

    async fn first_timestamp(&self, db: &str, measurement: &str, fields: Option<&[String]>) -> Result<Option<DateTime<Utc>>, TsdbError> {
        self.boundary_timestamp(db, measurement, fields, "FIRST", true).await
    }

    async fn last_timestamp(&self, db: &str, measurement: &str, fields: Option<&[String]>) -> Result<Option<DateTime<Utc>>, TsdbError> {
        self.boundary_timestamp(db, measurement, fields, "LAST", false).await
    }

    async fn query(&self, db: &str, query: &str) -> Result<QueryResult, TsdbError> {
        let decoded = self.run_query(db, query).await?;
        let Some(statement) = decoded.results.into_iter().next() else {
            return Ok(Vec::new());
        };
        statement.series.into_iter().map(series_to_block).collect()
    }

    async fn write_points(&self, db: &str, points: &[DataPoint]) -> Result<(), TsdbError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points.iter().map(encode_line_protocol).collect::<Vec<_>>().join("\n");
        let url = format!("{}/write", self.base_url);
        let response = self.request(self.client.post(&url).query(&[("db", db)]).body(body)).send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.bytes().await.unwrap_or_default();
            Err(map_status_error(status, &body, false))
        }
    }

    async fn create_database(&self, db: &str) -> Result<(), TsdbError> {
        let query = format!("CREATE DATABASE \"{db}\"");
        self.run_query("", &query).await.map(|_| ())
    }
}

impl InfluxHttpClient {
    async fn boundary_timestamp(
        &self,
        db: &str,
        measurement: &str,
        fields: Option<&[String]>,
        selector: &str,
        ascending: bool,
    ) -> Result<Option<DateTime<Utc>>, TsdbError> {
        let query = match fields {
            Some(fields) if !fields.is_empty() => {
                let selectors = fields.iter().map(|field| format!("{selector}(\"{field}\")")).collect::<Vec<_>>().join(", ");
                format!("SELECT {selectors} FROM \"{measurement}\"")
            }
            _ => {
                let order = if ascending { "ASC" } else { "DESC" };
                format!("SELECT * FROM \"{measurement}\" ORDER BY time {order} LIMIT 1")
            }
        };
        let decoded = self.run_query(db, &query).await?;
        let Some(mut row) = Self::first_series_points(decoded).into_iter().next() else {
            return Ok(None);
        };
        let Some(time_value) = row.remove("time") else {
            return Ok(None);
        };
        Ok(parse_time_value(&time_value))
    }
}

fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|raw| DateTime::parse_from_rfc3339(raw).ok()).map(|parsed| parsed.with_timezone(&Utc))
}

fn series_to_block(series: super::dto::SeriesDto) -> Result<SeriesBlock, TsdbError> {
    let columns = series.columns;
    let mut rows = Vec::with_capacity(series.values.len());
    for values in series.values {
        let mut fields = BTreeMap::new();
        let mut time = None;
        for (column, value) in columns.iter().zip(values) {
            if column == "time" {
                time = value.as_str().and_then(|raw| DateTime::parse_from_rfc3339(raw).ok()).map(|parsed| parsed.with_timezone(&Utc));
                continue;
            }
            if let Some(field_value) = json_to_field_value(&value) {
                fields.insert(column.clone(), field_value);
            }
        }
        let Some(time) = time else {
            continue;
        };
        rows.push(Row { time, fields });
    }
    Ok(SeriesBlock { name: series.name, tags: series.tags, rows })
}

fn json_to_field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(FieldValue::Bool(*flag)),
        Value::String(text) => Some(FieldValue::Str(text.clone())),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(FieldValue::Integer(int))
            } else {
                number.as_f64().map(FieldValue::Float)
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn encode_line_protocol(point: &DataPoint) -> String {
    let mut line = escape_identifier(&point.measurement);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_identifier(key));
        line.push('=');
        line.push_str(&escape_identifier(value));
    }
    line.push(' ');
    let fields = point.fields.iter().map(|(key, value)| format!("{}={value}", escape_identifier(key))).collect::<Vec<_>>().join(",");
    line.push_str(&fields);
    if let Some(nanos) = point.time.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }
    line
}

fn escape_identifier(raw: &str) -> String {
    raw.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

fn map_transport_error(error: reqwest::Error) -> TsdbError {
    TsdbError::unreachable(error.to_string())
}

fn map_status_error(status: StatusCode, body: &[u8], is_query: bool) -> TsdbError {
    let preview = String::from_utf8_lossy(body);
    let message = format!("status {}: {preview}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TsdbError::auth_failed(message),
        _ if is_query => TsdbError::query_error(message),
        _ => TsdbError::write_rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::FieldValue;
    use chrono::TimeZone;

    #[test]
    fn encodes_line_protocol_with_escaped_identifiers_and_typed_fields() {
        let point = DataPoint {
            measurement: "cpu usage".to_owned(),
            tags: BTreeMap::from([("host".to_owned(), "a,b".to_owned())]),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            fields: BTreeMap::from([("value".to_owned(), FieldValue::Integer(3))]),
        };
        let line = encode_line_protocol(&point);
        assert!(line.starts_with("cpu\\ usage,host=a\\,b value=3i "));
    }

    #[test]
    fn maps_unauthorized_status_to_auth_failed() {
        let error = map_status_error(StatusCode::UNAUTHORIZED, b"denied", true);
        assert!(matches!(error, TsdbError::AuthFailed { .. }));
    }

    #[test]
    fn maps_non_auth_query_failure_to_query_error() {
        let error = map_status_error(StatusCode::BAD_REQUEST, b"bad syntax", true);
        assert!(matches!(error, TsdbError::QueryError { .. }));
    }

    #[test]
    fn maps_non_auth_write_failure_to_write_rejected() {
        let error = map_status_error(StatusCode::INTERNAL_SERVER_ERROR, b"oops", false);
        assert!(matches!(error, TsdbError::WriteRejected { .. }));
    }
}
