//! InfluxQL-style query construction for a single pagination window.
//!
//! Grounded on `original_source/.../src/influx_client.py`'s query
//! builder and spec.md §4.4 "Query construction": a raw-point `SELECT`
//! over the active field list, bounded by the window, with `GROUP BY *`
//! to preserve per-series tag sets (plus `time(<dur>)` when a
//! `source.group_by` duration is configured; see DESIGN.md Open
//! Question 1 on why no aggregation aliasing is applied).

use super::pagination::Window;

const TIMESTAMP_FORMAT_ITEMS: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Builds the `SELECT` statement for one measurement's pagination window.
#[must_use]
pub fn build_query(measurement: &str, fields: &[String], window: &Window, group_by: Option<&str>) -> String {
    let field_list = fields
        .iter()
        .map(|field| format!("\"{field}\""))
        .collect::<Vec<_>>()
        .join(",");
    let mut query = format!(
        "SELECT {field_list} FROM \"{measurement}\" WHERE time > '{}' AND time <= '{}'",
        window.start.format(TIMESTAMP_FORMAT_ITEMS),
        window.end.format(TIMESTAMP_FORMAT_ITEMS),
    );
    match group_by {
        Some(duration) => query.push_str(&format!(" GROUP BY *, time({duration})")),
        None => query.push_str(" GROUP BY *"),
    }
    query
}
