//! Duration string parsing shared by obsolescence filters.
//!
//! Grounded on `_is_obsolete`'s unit table in the original backup
//! manager: `<n><u>` with `u` one of `s, m, h, d, w, M, y`, where `M`
//! and `y` are explicit calendar approximations (30 and 365 days) and
//! must not drift to real calendar arithmetic, per Design Notes §9.

use std::time::Duration;

/// Parse a duration string of the form `<integer><unit>`.
///
/// `unit` must be one of `s`, `m`, `h`, `d`, `w`, `M`, `y`. `M` is
/// exactly 30 days and `y` is exactly 365 days.
///
/// Returns `None` on any malformed input (missing digits, missing
/// unit, unrecognized unit, or a number that doesn't fit `u64`).
/// Per spec.md §4.4, callers must treat `None` as "disable this
/// obsolescence filter" and log a warning, never as a hard failure.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let split_at = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split_at);
    if digits.is_empty() || unit.len() != 1 {
        return None;
    }
    let count: u64 = digits.parse().ok()?;
    let seconds_per_unit: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        "M" => 30 * 24 * 60 * 60,
        "y" => 365 * 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(count.saturating_mul(seconds_per_unit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("30s", Some(Duration::from_secs(30)))]
    #[case("5m", Some(Duration::from_secs(300)))]
    #[case("2h", Some(Duration::from_secs(7_200)))]
    #[case("30d", Some(Duration::from_secs(30 * 86_400)))]
    #[case("1w", Some(Duration::from_secs(7 * 86_400)))]
    #[case("1M", Some(Duration::from_secs(30 * 86_400)))]
    #[case("1y", Some(Duration::from_secs(365 * 86_400)))]
    #[case("", None)]
    #[case("days", None)]
    #[case("30", None)]
    #[case("30x", None)]
    fn parses_known_units_and_rejects_the_rest(
        #[case] raw: &str,
        #[case] expected: Option<Duration>,
    ) {
        assert_eq!(parse_duration(raw), expected);
    }

    #[test]
    fn month_and_year_are_fixed_approximations_not_calendar_arithmetic() {
        assert_eq!(parse_duration("1M"), Some(Duration::from_secs(30 * 86_400)));
        assert_eq!(
            parse_duration("1y"),
            Some(Duration::from_secs(365 * 86_400))
        );
    }
}
