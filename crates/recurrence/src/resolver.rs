//! The recurrence resolver.
//!
//! Turns an [`RRule`] plus an anchor (or a fixed start) into concrete
//! occurrence instants. All queries are pure and deterministic.

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use tracing::debug;

use crate::error::RecurrenceError;
use crate::rrule::RRule;

/// One Gregorian cycle. A rule with no occurrence for this long never matches
/// again (e.g. `BYMONTH=2;BYMONTHDAY=30`) and is treated as exhausted.
const MAX_SILENT_DAYS: i64 = 146_097;

/// Upper bound on the number of missed occurrences counted by
/// [`Recurrence::next_future`] before it jumps straight past `now`.
const MAX_CATCH_UP_COUNT: u64 = 1000;

/// Input to the resolver: a rule with its resolved start, or a single instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Rule { rule: RRule, start: DateTime<Utc> },
    Once { start: DateTime<Utc> },
}

/// Result of [`Recurrence::next_future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    /// First occurrence strictly after `now`, or `None` when exhausted.
    pub next: Option<DateTime<Utc>>,
    /// Occurrences in `(after, now]` that were passed over.
    pub skipped: u64,
}

impl Recurrence {
    /// Parse an RRULE expression. `anchor` is used when the expression carries
    /// no DTSTART of its own.
    pub fn parse(expr: &str, anchor: DateTime<Utc>) -> Result<Self, RecurrenceError> {
        let rule: RRule = expr.parse()?;
        Ok(Self::from_rule(rule, anchor))
    }

    pub fn from_rule(rule: RRule, anchor: DateTime<Utc>) -> Self {
        let start = whole_seconds(rule.dtstart.unwrap_or(anchor));
        Self::Rule { rule, start }
    }

    pub fn once(start: DateTime<Utc>) -> Self {
        Self::Once { start }
    }

    /// The rule's effective DTSTART, or the one-shot instant.
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            Self::Rule { start, .. } | Self::Once { start } => *start,
        }
    }

    /// Earliest occurrence strictly after `t`; `None` once exhausted.
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once { start } => (*start > t).then_some(*start),
            Self::Rule { rule, start } => {
                let mut found = None;
                walk(rule, *start, Some(t), |occ| {
                    found = Some(occ);
                    false
                });
                found
            }
        }
    }

    /// Occurrences in `[from, to)`, at most `limit` of them.
    pub fn between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        if limit == 0 || from >= to {
            return out;
        }
        match self {
            Self::Once { start } => {
                if *start >= from && *start < to {
                    out.push(*start);
                }
            }
            Self::Rule { rule, start } => {
                let after = from.checked_sub_signed(TimeDelta::nanoseconds(1));
                walk(rule, *start, after, |occ| {
                    if occ >= to {
                        return false;
                    }
                    out.push(occ);
                    out.len() < limit
                });
            }
        }
        out
    }

    /// Catch-up query: the first occurrence after both `after` and `now`.
    ///
    /// Occurrences in `(after, now]` are counted as skipped; they are never
    /// returned. Counting stops at a fixed bound, after which the resolver
    /// jumps directly past `now`.
    pub fn next_future(&self, after: DateTime<Utc>, now: DateTime<Utc>) -> CatchUp {
        match self {
            Self::Once { start } => {
                if *start > now {
                    CatchUp { next: Some(*start), skipped: 0 }
                } else {
                    CatchUp { next: None, skipped: u64::from(*start > after) }
                }
            }
            Self::Rule { rule, start } => {
                let mut next = None;
                let mut skipped = 0u64;
                let mut capped = false;
                walk(rule, *start, Some(after), |occ| {
                    if occ > now {
                        next = Some(occ);
                        return false;
                    }
                    skipped += 1;
                    if skipped >= MAX_CATCH_UP_COUNT {
                        capped = true;
                        return false;
                    }
                    true
                });
                if capped {
                    next = self.next_after(now);
                }
                CatchUp { next, skipped }
            }
        }
    }

    /// Whether the sequence is bounded (COUNT, UNTIL or one-shot).
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Once { .. } => true,
            Self::Rule { rule, .. } => rule.is_finite(),
        }
    }
}

/// Walk occurrences in order, calling `visit` for each one strictly after
/// `after` until it returns `false` or the rule is exhausted.
fn walk(
    rule: &RRule,
    start: DateTime<Utc>,
    after: Option<DateTime<Utc>>,
    mut visit: impl FnMut(DateTime<Utc>) -> bool,
) {
    // COUNT depends on every occurrence since DTSTART, so only unbounded-count
    // rules may jump ahead.
    let mut index = match (rule.count, after) {
        (None, Some(t)) if t > start => rule.period_index_of(start, t).unwrap_or(0),
        _ => 0,
    };
    let mut produced = 0u32;
    let Some(mut last_hit) = rule.period_start(start, index) else {
        return;
    };

    loop {
        let Some(period) = rule.period_start(start, index) else {
            return;
        };
        if rule.until.is_some_and(|until| period > until) {
            return;
        }
        if (period - last_hit).num_days() > MAX_SILENT_DAYS {
            debug!(freq = ?rule.freq, %last_hit, "rule silent for a full calendar cycle, treating as exhausted");
            return;
        }
        let Some(candidates) = rule.period_occurrences(start, index) else {
            return;
        };

        let mut any = false;
        for occ in candidates {
            if occ < start {
                continue;
            }
            if rule.until.is_some_and(|until| occ > until) {
                return;
            }
            any = true;
            produced += 1;
            if after.map_or(true, |t| occ > t) && !visit(occ) {
                return;
            }
            if rule.count.is_some_and(|count| produced >= count) {
                return;
            }
        }

        if any {
            last_hit = period;
            index += 1;
        } else {
            index = rule.next_viable_index(start, index);
        }
    }
}

fn whole_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
