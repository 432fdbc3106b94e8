//! Converts a query result set into write-ready data points.
//!
//! Grounded on `original_source/.../src/backup.py`'s row-to-point
//! conversion: each `SeriesBlock`'s tags are attached to every one of
//! its rows, and any field not in the active set (defensive — the
//! query already restricts the field list) is dropped.

use std::collections::BTreeMap;

use crate::domain::ports::tsdb_client::{DataPoint, QueryResult};

/// Flattens a [`QueryResult`] into [`DataPoint`]s restricted to
/// `active_fields`, tagging each point with its source measurement.
#[must_use]
pub fn transform_query_result(result: QueryResult, measurement: &str, active_fields: &[String]) -> Vec<DataPoint> {
    let allowed: std::collections::BTreeSet<&str> = active_fields.iter().map(String::as_str).collect();
    let mut points = Vec::new();
    for block in result {
        for row in block.rows {
            let fields: BTreeMap<_, _> = row.fields.into_iter().filter(|(name, _)| allowed.contains(name.as_str())).collect();
            if fields.is_empty() {
                continue;
            }
            points.push(DataPoint {
                measurement: measurement.to_owned(),
                tags: block.tags.clone(),
                time: row.time,
                fields,
            });
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::FieldValue;
    use crate::domain::ports::tsdb_client::{Row, SeriesBlock};
    use chrono::Utc;

    #[test]
    fn attaches_series_tags_to_every_row_and_drops_inactive_fields() {
        let now = Utc::now();
        let result = vec![SeriesBlock {
            name: "cpu".to_owned(),
            tags: BTreeMap::from([("host".to_owned(), "a".to_owned())]),
            rows: vec![Row {
                time: now,
                fields: BTreeMap::from([
                    ("usage".to_owned(), FieldValue::Float(1.0)),
                    ("stale".to_owned(), FieldValue::Float(2.0)),
                ]),
            }],
        }];
        let points = transform_query_result(result, "cpu", &["usage".to_owned()]);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].tags.get("host"), Some(&"a".to_owned()));
        assert!(points[0].fields.contains_key("usage"));
        assert!(!points[0].fields.contains_key("stale"));
    }

    #[test]
    fn drops_rows_left_with_no_active_fields() {
        let now = Utc::now();
        let result = vec![SeriesBlock {
            name: "cpu".to_owned(),
            tags: BTreeMap::new(),
            rows: vec![Row { time: now, fields: BTreeMap::from([("stale".to_owned(), FieldValue::Float(2.0))]) }],
        }];
        let points = transform_query_result(result, "cpu", &["usage".to_owned()]);
        assert!(points.is_empty());
    }
}
