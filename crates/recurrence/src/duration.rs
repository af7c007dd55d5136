//! ISO 8601 duration parsing (`P1DT2H30M`, `PT1H`, `P2W`...).
//!
//! Calendar units are approximated: a year is 365 days, a month 30 days.

use chrono::TimeDelta;

use crate::error::RecurrenceError;

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3_600.0;
const SECS_PER_DAY: f64 = 86_400.0;

/// Parse an ISO 8601 duration of the form `PnYnMnWnDTnHnMnS`.
///
/// Components must appear in order and at most once. Only the seconds
/// component may carry a fraction (`.` or `,`).
pub fn parse_iso8601_duration(input: &str) -> Result<TimeDelta, RecurrenceError> {
    let fail = |reason: &str| RecurrenceError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim().to_ascii_uppercase();
    let body = s.strip_prefix('P').ok_or_else(|| fail("must start with 'P'"))?;
    if body.is_empty() {
        return Err(fail("no components"));
    }

    let mut total_secs = 0.0f64;
    let mut num_buf = String::new();
    let mut in_time = false;
    let mut found_unit = false;
    // Position in the designator order; each unit must come after the last.
    let mut last_rank = 0u8;

    for ch in body.chars() {
        match ch {
            '0'..='9' => num_buf.push(ch),
            '.' | ',' => num_buf.push('.'),
            'T' => {
                if in_time || !num_buf.is_empty() {
                    return Err(fail("misplaced 'T'"));
                }
                in_time = true;
            }
            unit => {
                let (rank, secs_per_unit) = match (in_time, unit) {
                    (false, 'Y') => (1, 365.0 * SECS_PER_DAY),
                    (false, 'M') => (2, 30.0 * SECS_PER_DAY),
                    (false, 'W') => (3, 7.0 * SECS_PER_DAY),
                    (false, 'D') => (4, SECS_PER_DAY),
                    (true, 'H') => (5, SECS_PER_HOUR),
                    (true, 'M') => (6, SECS_PER_MINUTE),
                    (true, 'S') => (7, 1.0),
                    _ => return Err(fail(&format!("unexpected designator '{unit}'"))),
                };
                if rank <= last_rank {
                    return Err(fail(&format!("designator '{unit}' is out of order")));
                }
                if num_buf.is_empty() {
                    return Err(fail(&format!("designator '{unit}' has no value")));
                }
                if num_buf.contains('.') && unit != 'S' {
                    return Err(fail("only seconds may be fractional"));
                }
                let n: f64 = num_buf
                    .parse()
                    .map_err(|_| fail(&format!("bad number '{num_buf}'")))?;
                num_buf.clear();
                total_secs += n * secs_per_unit;
                last_rank = rank;
                found_unit = true;
            }
        }
    }

    if !num_buf.is_empty() {
        return Err(fail("trailing number without designator"));
    }
    if !found_unit {
        return Err(fail("no components"));
    }
    if in_time && last_rank < 5 {
        return Err(fail("'T' must be followed by a time component"));
    }

    let millis = (total_secs * 1_000.0).round();
    if !millis.is_finite() || millis > i64::MAX as f64 {
        return Err(fail("out of range"));
    }
    TimeDelta::try_milliseconds(millis as i64).ok_or_else(|| fail("out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(s: &str) -> TimeDelta {
        parse_iso8601_duration(s).unwrap_or_else(|e| panic!("{s}: {e}"))
    }

    #[test]
    fn parses_hours() {
        assert_eq!(ok("PT1H"), TimeDelta::hours(1));
    }

    #[test]
    fn parses_combined() {
        assert_eq!(
            ok("P1DT2H30M"),
            TimeDelta::days(1) + TimeDelta::hours(2) + TimeDelta::minutes(30)
        );
    }

    #[test]
    fn parses_weeks_and_calendar_units() {
        assert_eq!(ok("P2W"), TimeDelta::days(14));
        assert_eq!(ok("P1M"), TimeDelta::days(30));
        assert_eq!(ok("P1Y"), TimeDelta::days(365));
    }

    #[test]
    fn minutes_vs_months() {
        assert_eq!(ok("PT5M"), TimeDelta::minutes(5));
        assert_eq!(ok("P5M"), TimeDelta::days(150));
    }

    #[test]
    fn fractional_seconds() {
        assert_eq!(ok("PT1.5S"), TimeDelta::milliseconds(1_500));
        assert_eq!(ok("pt0,25s"), TimeDelta::milliseconds(250));
    }

    #[test]
    fn zero_is_allowed() {
        assert_eq!(ok("PT0S"), TimeDelta::zero());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "P", "PT", "1H", "PT1", "P1H", "PT1D", "P1DT", "PT1.5H", "PT1M1H", "P1D1D", "PXD"] {
            assert!(parse_iso8601_duration(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn error_carries_input() {
        let err = parse_iso8601_duration("P1X").unwrap_err();
        assert!(err.to_string().contains("P1X"));
    }
}
