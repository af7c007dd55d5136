//! RRULE parsing.
//!
//! Accepts the subset of RFC 5545 that the scheduler can resolve in UTC:
//!
//! ```text
//! DTSTART:20250106T090000Z
//! RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=10
//! ```
//!
//! `DTSTART` may also appear inline as a rule part (`DTSTART=...`), and the
//! `RRULE:` prefix is optional. Parsing is case-insensitive.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};

use crate::error::{invalid, RecurrenceError};

/// Recurrence frequency (the `FREQ` part).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
}

impl FromStr for Frequency {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YEARLY" => Ok(Self::Yearly),
            "MONTHLY" => Ok(Self::Monthly),
            "WEEKLY" => Ok(Self::Weekly),
            "DAILY" => Ok(Self::Daily),
            "HOURLY" => Ok(Self::Hourly),
            "MINUTELY" => Ok(Self::Minutely),
            "SECONDLY" => Err(invalid("FREQ=SECONDLY is not supported")),
            other => Err(invalid(format!("unknown FREQ '{other}'"))),
        }
    }
}

/// A `BYDAY` entry: a weekday with an optional signed ordinal.
///
/// `-1FR` is the last Friday of the month (MONTHLY) or year (YEARLY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
    pub weekday: Weekday,
    pub ordinal: Option<i32>,
}

/// A parsed recurrence rule.
///
/// All `by_*` lists are sorted and deduplicated. An empty list means the
/// part was not given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RRule {
    pub freq: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub by_month: Vec<u32>,
    pub by_month_day: Vec<i32>,
    pub by_day: Vec<ByDay>,
    pub by_hour: Vec<u32>,
    pub by_minute: Vec<u32>,
    pub by_second: Vec<u32>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Weekday,
    /// Anchor embedded in the expression. When absent the caller supplies one.
    pub dtstart: Option<DateTime<Utc>>,
}

impl RRule {
    fn empty(freq: Frequency) -> Self {
        Self {
            freq,
            interval: 1,
            count: None,
            until: None,
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_day: Vec::new(),
            by_hour: Vec::new(),
            by_minute: Vec::new(),
            by_second: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: Weekday::Mon,
            dtstart: None,
        }
    }

    /// Whether the rule has a COUNT or UNTIL bound.
    pub fn is_finite(&self) -> bool {
        self.count.is_some() || self.until.is_some()
    }
}

impl FromStr for RRule {
    type Err = RecurrenceError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let upper = input.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Err(invalid("expression is empty"));
        }

        let mut dtstart_line = None;
        let mut rule_line = None;

        for line in upper.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("DTSTART") {
                if rest.starts_with(';') {
                    return Err(invalid("DTSTART parameters (e.g. TZID) are not supported"));
                }
                let value = rest
                    .strip_prefix(':')
                    .ok_or_else(|| invalid(format!("malformed DTSTART line '{line}'")))?;
                if dtstart_line.replace(parse_datetime("DTSTART", value)?).is_some() {
                    return Err(invalid("DTSTART given more than once"));
                }
            } else {
                let body = line.strip_prefix("RRULE:").unwrap_or(line);
                if !body.contains("FREQ=") {
                    return Err(invalid(format!("unrecognised line '{line}'")));
                }
                if rule_line.replace(body).is_some() {
                    return Err(invalid("only one RRULE line is supported"));
                }
            }
        }

        let body = rule_line.ok_or_else(|| invalid("missing FREQ"))?;
        let mut rule = parse_parts(body)?;

        match (rule.dtstart, dtstart_line) {
            (Some(_), Some(_)) => return Err(invalid("DTSTART given more than once")),
            (None, Some(dt)) => rule.dtstart = Some(dt),
            _ => {}
        }

        Ok(rule)
    }
}

fn parse_parts(body: &str) -> Result<RRule, RecurrenceError> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();

    for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("part '{part}' is not KEY=VALUE")))?;
        if value.is_empty() {
            return Err(invalid(format!("{key} has an empty value")));
        }
        if !seen.insert(key) {
            return Err(invalid(format!("{key} given more than once")));
        }
        pairs.push((key, value));
    }

    let freq = pairs
        .iter()
        .find(|(k, _)| *k == "FREQ")
        .map(|(_, v)| v.parse::<Frequency>())
        .transpose()?
        .ok_or_else(|| invalid("missing FREQ"))?;

    let mut rule = RRule::empty(freq);

    for (key, value) in pairs {
        match key {
            "FREQ" => {}
            "INTERVAL" => {
                rule.interval = parse_number(key, value)?;
                if rule.interval == 0 {
                    return Err(invalid("INTERVAL must be at least 1"));
                }
            }
            "COUNT" => {
                let count: u32 = parse_number(key, value)?;
                if count == 0 {
                    return Err(invalid("COUNT must be at least 1"));
                }
                rule.count = Some(count);
            }
            "UNTIL" => rule.until = Some(parse_datetime(key, value)?),
            "DTSTART" => rule.dtstart = Some(parse_datetime(key, value)?),
            "BYMONTH" => rule.by_month = parse_unsigned_list(key, value, 1, 12)?,
            "BYMONTHDAY" => rule.by_month_day = parse_signed_list(key, value, 31)?,
            "BYHOUR" => rule.by_hour = parse_unsigned_list(key, value, 0, 23)?,
            "BYMINUTE" => rule.by_minute = parse_unsigned_list(key, value, 0, 59)?,
            "BYSECOND" => rule.by_second = parse_unsigned_list(key, value, 0, 59)?,
            "BYSETPOS" => rule.by_set_pos = parse_signed_list(key, value, 366)?,
            "BYDAY" => rule.by_day = parse_by_day(value)?,
            "WKST" => rule.week_start = parse_weekday(value)?,
            "BYYEARDAY" | "BYWEEKNO" => {
                return Err(invalid(format!("{key} is not supported")));
            }
            other => return Err(invalid(format!("unknown part '{other}'"))),
        }
    }

    check_consistency(&rule)?;
    Ok(rule)
}

fn check_consistency(rule: &RRule) -> Result<(), RecurrenceError> {
    if rule.count.is_some() && rule.until.is_some() {
        return Err(invalid("COUNT and UNTIL are mutually exclusive"));
    }

    let ordinals_allowed = matches!(rule.freq, Frequency::Monthly | Frequency::Yearly);
    for day in &rule.by_day {
        if let Some(n) = day.ordinal {
            if !ordinals_allowed {
                return Err(invalid(
                    "BYDAY ordinals are only valid with FREQ=MONTHLY or FREQ=YEARLY",
                ));
            }
            let limit = if rule.freq == Frequency::Monthly { 5 } else { 53 };
            if n == 0 || !(-limit..=limit).contains(&n) {
                return Err(invalid(format!("BYDAY ordinal {n} is out of range")));
            }
        }
    }

    let has_other_by = !(rule.by_month.is_empty()
        && rule.by_month_day.is_empty()
        && rule.by_day.is_empty()
        && rule.by_hour.is_empty()
        && rule.by_minute.is_empty()
        && rule.by_second.is_empty());
    if !rule.by_set_pos.is_empty() && !has_other_by {
        return Err(invalid("BYSETPOS requires another BYxxx part"));
    }

    if let (Some(start), Some(until)) = (rule.dtstart, rule.until) {
        if until < start {
            return Err(invalid("UNTIL is before DTSTART"));
        }
    }

    Ok(())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, RecurrenceError> {
    value
        .parse()
        .map_err(|_| invalid(format!("{key} value '{value}' is not a number")))
}

fn parse_unsigned_list(
    key: &str,
    value: &str,
    min: u32,
    max: u32,
) -> Result<Vec<u32>, RecurrenceError> {
    let mut out = Vec::new();
    for item in value.split(',') {
        let n: u32 = parse_number(key, item.trim())?;
        if n < min || n > max {
            return Err(invalid(format!("{key} value {n} is outside {min}..={max}")));
        }
        out.push(n);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Signed list where 0 is invalid and `|n| <= max_abs`.
fn parse_signed_list(key: &str, value: &str, max_abs: i32) -> Result<Vec<i32>, RecurrenceError> {
    let mut out = Vec::new();
    for item in value.split(',') {
        let n: i32 = parse_number(key, item.trim())?;
        if n == 0 || !(-max_abs..=max_abs).contains(&n) {
            return Err(invalid(format!("{key} value {n} is out of range")));
        }
        out.push(n);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn parse_by_day(value: &str) -> Result<Vec<ByDay>, RecurrenceError> {
    let mut out: Vec<ByDay> = Vec::new();
    for item in value.split(',').map(str::trim) {
        if item.len() < 2 || !item.is_ascii() {
            return Err(invalid(format!("BYDAY value '{item}' is malformed")));
        }
        let (prefix, code) = item.split_at(item.len() - 2);
        let weekday = parse_weekday(code)?;
        let ordinal = if prefix.is_empty() {
            None
        } else {
            let n: i32 = prefix
                .trim_start_matches('+')
                .parse()
                .map_err(|_| invalid(format!("BYDAY value '{item}' has a bad ordinal")))?;
            Some(n)
        };
        let day = ByDay { weekday, ordinal };
        if !out.contains(&day) {
            out.push(day);
        }
    }
    Ok(out)
}

fn parse_weekday(code: &str) -> Result<Weekday, RecurrenceError> {
    match code {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(invalid(format!("unknown weekday '{other}'"))),
    }
}

/// Parse `YYYYMMDDTHHMMSSZ`, `YYYYMMDDTHHMMSS`, `YYYYMMDD` or RFC 3339 as UTC.
pub(crate) fn parse_datetime(key: &str, value: &str) -> Result<DateTime<Utc>, RecurrenceError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let basic = value.strip_suffix('Z').unwrap_or(value);
    if let Ok(naive) = NaiveDateTime::parse_from_str(basic, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Some(naive) = NaiveDate::parse_from_str(basic, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(invalid(format!("{key} value '{value}' is not a valid date-time")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> RRule {
        s.parse().unwrap_or_else(|e| panic!("failed to parse {s:?}: {e}"))
    }

    fn parse_err(s: &str) -> String {
        match s.parse::<RRule>() {
            Ok(rule) => panic!("expected error for {s:?}, got {rule:?}"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn parses_minimal_daily() {
        let rule = parse("FREQ=DAILY");
        assert_eq!(rule.freq, Frequency::Daily);
        assert_eq!(rule.interval, 1);
        assert!(rule.count.is_none());
        assert!(rule.dtstart.is_none());
        assert!(!rule.is_finite());
    }

    #[test]
    fn parses_prefix_and_dtstart_line() {
        let rule = parse("DTSTART:20250106T090000Z\nRRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE");
        assert_eq!(rule.freq, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(
            rule.dtstart,
            Some(Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap())
        );
        let days: Vec<Weekday> = rule.by_day.iter().map(|d| d.weekday).collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Wed]);
    }

    #[test]
    fn parses_inline_dtstart_lowercase() {
        let rule = parse("freq=monthly;dtstart=20240131T120000z;bymonthday=-1");
        assert_eq!(rule.freq, Frequency::Monthly);
        assert_eq!(rule.by_month_day, vec![-1]);
        assert!(rule.dtstart.is_some());
    }

    #[test]
    fn parses_ordinal_by_day() {
        let rule = parse("FREQ=MONTHLY;BYDAY=-1FR,+2MO");
        assert_eq!(
            rule.by_day,
            vec![
                ByDay { weekday: Weekday::Fri, ordinal: Some(-1) },
                ByDay { weekday: Weekday::Mon, ordinal: Some(2) },
            ]
        );
    }

    #[test]
    fn lists_are_sorted_and_deduplicated() {
        let rule = parse("FREQ=DAILY;BYHOUR=18,9,9,12");
        assert_eq!(rule.by_hour, vec![9, 12, 18]);
    }

    #[test]
    fn until_accepts_date_only() {
        let rule = parse("FREQ=DAILY;UNTIL=20251231");
        assert_eq!(
            rule.until,
            Some(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse_err("").contains("empty"));
        assert!(parse_err("INTERVAL=2").contains("unrecognised"));
        assert!(parse_err("FREQ=FORTNIGHTLY").contains("unknown FREQ"));
        assert!(parse_err("FREQ=SECONDLY").contains("not supported"));
        assert!(parse_err("FREQ=DAILY;INTERVAL=0").contains("INTERVAL"));
        assert!(parse_err("FREQ=DAILY;COUNT=0").contains("COUNT"));
        assert!(parse_err("FREQ=DAILY;COUNT=abc").contains("not a number"));
        assert!(parse_err("FREQ=DAILY;BYMONTH=13").contains("BYMONTH"));
        assert!(parse_err("FREQ=DAILY;BYMONTHDAY=0").contains("out of range"));
        assert!(parse_err("FREQ=DAILY;BYDAY=XX").contains("weekday"));
        assert!(parse_err("FREQ=DAILY;FREQ=WEEKLY").contains("more than once"));
        assert!(parse_err("FREQ=DAILY;BYWEEKNO=3").contains("not supported"));
        assert!(parse_err("FREQ=DAILY;FOO=1").contains("unknown part"));
        assert!(parse_err("FREQ=DAILY;INTERVAL").contains("KEY=VALUE"));
        assert!(parse_err("FREQ=DAILY;BYDAY=").contains("empty value"));
    }

    #[test]
    fn rejects_inconsistent_parts() {
        assert!(parse_err("FREQ=DAILY;COUNT=3;UNTIL=20250101T000000Z").contains("mutually exclusive"));
        assert!(parse_err("FREQ=WEEKLY;BYDAY=1MO").contains("ordinals"));
        assert!(parse_err("FREQ=MONTHLY;BYDAY=6MO").contains("out of range"));
        assert!(parse_err("FREQ=MONTHLY;BYSETPOS=1").contains("BYSETPOS"));
        assert!(parse_err("DTSTART;TZID=Europe/Paris:20250101T090000\nRRULE:FREQ=DAILY").contains("TZID"));
        assert!(parse_err("FREQ=DAILY;DTSTART=20250201T000000Z;UNTIL=20250101T000000Z").contains("before DTSTART"));
    }

    #[test]
    fn rejects_extreme_signed_values() {
        assert!(parse_err("FREQ=MONTHLY;BYMONTHDAY=-2147483648").contains("out of range"));
        assert!(parse_err("FREQ=MONTHLY;BYDAY=MO;BYSETPOS=-2147483648").contains("out of range"));
        assert!(parse_err("FREQ=MONTHLY;BYDAY=-2147483648MO").contains("out of range"));
        assert!(parse_err("FREQ=YEARLY;BYMONTHDAY=2147483647").contains("out of range"));
    }
}
