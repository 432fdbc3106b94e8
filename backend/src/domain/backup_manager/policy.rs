//! Pure filtering and resume-protocol decisions, kept free of I/O so
//! they can be unit-tested without a TSDB fixture.
//!
//! Grounded on `original_source/.../src/backup.py`'s
//! `_get_fields_to_backup`/`_is_obsolete`/resume-point selection,
//! mirroring the teacher's split of pure policy out of
//! `overpass_enrichment_worker/policy.rs`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::config::FieldFilter;
use crate::domain::field::DeclaredType;

/// Applies a measurement include/exclude filter, per spec.md §4.2:
/// `include` dominates when non-empty, otherwise `exclude` is applied.
#[must_use]
pub fn filter_measurements(all: &[String], include: &[String], exclude: &[String]) -> Vec<String> {
    if include.is_empty() {
        all.iter().filter(|name| !exclude.iter().any(|excluded| excluded == *name)).cloned().collect()
    } else {
        all.iter().filter(|name| include.iter().any(|included| included == *name)).cloned().collect()
    }
}

/// Computes the active field set for one measurement: declared fields
/// restricted to the filter's effective types, then to its
/// include/exclude list, sorted for deterministic query construction.
#[must_use]
pub fn select_active_fields(field_keys: &BTreeMap<String, DeclaredType>, filter: &FieldFilter) -> Vec<String> {
    let types = filter.effective_types();
    let mut candidates: Vec<String> = field_keys
        .iter()
        .filter(|(_, declared)| types.contains(&declared.normalize()))
        .map(|(name, _)| name.clone())
        .collect();
    if filter.include.is_empty() {
        candidates.retain(|field| !filter.exclude.iter().any(|excluded| excluded == field));
    } else {
        candidates.retain(|field| filter.include.iter().any(|included| included == field));
    }
    candidates.sort();
    candidates
}

/// Whether a timestamp is old enough to count as obsolete under
/// `threshold`, per spec.md §4.4's obsolescence rule
/// (`now_utc - last > threshold`). Absent `last` or `threshold` never
/// counts as obsolete.
#[must_use]
pub fn is_obsolete(last: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Option<Duration>) -> bool {
    let (Some(last), Some(threshold)) = (last, threshold) else {
        return false;
    };
    let Ok(threshold) = chrono::Duration::from_std(threshold) else {
        return false;
    };
    now.signed_duration_since(last) > threshold
}

/// Outcome of resolving a measurement's resume point, per spec.md
/// §4.4's resume protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeDecision {
    /// Exclusive lower pagination bound, when the measurement is not skipped.
    pub start: Option<DateTime<Utc>>,
    /// `true` when the measurement should be skipped entirely this run.
    pub skip: bool,
}

/// Resolves where pagination should resume for one measurement in
/// incremental mode.
///
/// - destination has a last point and it is not obsolete: resume
///   just after it.
/// - destination has a last point and it is obsolete: skip.
/// - destination has no last point: resume from just before the
///   source's first point, if any; otherwise skip (nothing to copy).
#[must_use]
pub fn resolve_resume_start(
    t_last: Option<DateTime<Utc>>,
    t_first: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    obsolete_threshold: Option<Duration>,
) -> ResumeDecision {
    if let Some(last) = t_last {
        if is_obsolete(Some(last), now, obsolete_threshold) {
            return ResumeDecision { start: None, skip: true };
        }
        return ResumeDecision { start: Some(last), skip: false };
    }
    match t_first {
        Some(first) => ResumeDecision {
            start: first.checked_sub_signed(chrono::Duration::microseconds(1)),
            skip: false,
        },
        None => ResumeDecision { start: None, skip: true },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::NormalizedType;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::collections::HashSet;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn include_dominates_exclude_for_measurements() {
        let all = vec!["cpu".to_owned(), "mem".to_owned(), "disk".to_owned()];
        let result = filter_measurements(&all, &["cpu".to_owned()], &["cpu".to_owned()]);
        assert_eq!(result, vec!["cpu".to_owned()]);
    }

    #[test]
    fn exclude_applies_when_include_is_empty() {
        let all = vec!["cpu".to_owned(), "mem".to_owned()];
        let result = filter_measurements(&all, &[], &["mem".to_owned()]);
        assert_eq!(result, vec!["cpu".to_owned()]);
    }

    #[test]
    fn active_fields_are_restricted_by_type_then_include_exclude_and_sorted() {
        let mut field_keys = BTreeMap::new();
        field_keys.insert("usage".to_owned(), DeclaredType::Float);
        field_keys.insert("label".to_owned(), DeclaredType::Str);
        field_keys.insert("count".to_owned(), DeclaredType::Integer);
        let filter = FieldFilter {
            types: HashSet::from([NormalizedType::Numeric]),
            include: vec![],
            exclude: vec!["count".to_owned()],
        };
        assert_eq!(select_active_fields(&field_keys, &filter), vec!["usage".to_owned()]);
    }

    #[rstest]
    #[case(Some(ymd(2024, 1, 1)), ymd(2024, 2, 1), Some(Duration::from_secs(86400)), true)]
    #[case(Some(ymd(2024, 1, 30)), ymd(2024, 2, 1), Some(Duration::from_secs(86400 * 7)), false)]
    #[case(None, ymd(2024, 2, 1), Some(Duration::from_secs(1)), false)]
    #[case(Some(ymd(2024, 1, 1)), ymd(2024, 2, 1), None, false)]
    fn obsolescence_requires_both_a_timestamp_and_a_threshold(
        #[case] last: Option<DateTime<Utc>>,
        #[case] now: DateTime<Utc>,
        #[case] threshold: Option<Duration>,
        #[case] expected: bool,
    ) {
        assert_eq!(is_obsolete(last, now, threshold), expected);
    }

    #[test]
    fn resumes_just_after_last_when_destination_has_data_and_is_fresh() {
        let decision = resolve_resume_start(Some(ymd(2024, 1, 10)), None, ymd(2024, 1, 11), None);
        assert_eq!(decision, ResumeDecision { start: Some(ymd(2024, 1, 10)), skip: false });
    }

    #[test]
    fn skips_when_last_is_obsolete() {
        let decision = resolve_resume_start(
            Some(ymd(2024, 1, 1)),
            None,
            ymd(2024, 2, 1),
            Some(Duration::from_secs(86400)),
        );
        assert_eq!(decision, ResumeDecision { start: None, skip: true });
    }

    #[test]
    fn falls_back_to_source_first_timestamp_when_destination_is_empty() {
        let first = ymd(2024, 1, 5);
        let decision = resolve_resume_start(None, Some(first), ymd(2024, 1, 6), None);
        assert_eq!(decision.start, Some(first - chrono::Duration::microseconds(1)));
        assert!(!decision.skip);
    }

    #[test]
    fn skips_when_neither_destination_nor_source_has_data() {
        let decision = resolve_resume_start(None, None, ymd(2024, 1, 6), None);
        assert_eq!(decision, ResumeDecision { start: None, skip: true });
    }
}
