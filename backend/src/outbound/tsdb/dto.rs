//! Wire shapes for the TSDB's HTTP query API response.
//!
//! Grounded on `influx_client.py`'s `ResultSet`/`get_points()` usage:
//! a query response is a list of per-statement results, each with a
//! list of series, each series carrying its own column names and
//! row-major values.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(super) struct QueryResponseDto {
    #[serde(default)]
    pub results: Vec<StatementResultDto>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatementResultDto {
    #[serde(default)]
    pub series: Vec<SeriesDto>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SeriesDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}
