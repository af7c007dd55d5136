//! Per-period expansion of an [`RRule`] into candidate instants.
//!
//! A period is one FREQ unit (a year, a month, a week...) counted from the
//! period that contains the rule's start. Period `k` covers the
//! `k * INTERVAL`-th unit. Expansion ignores COUNT, UNTIL and the start bound;
//! the resolver applies those while walking periods in order.

use chrono::{
    DateTime, Datelike, Days, NaiveDate, TimeDelta, TimeZone, Timelike, Utc,
    Weekday,
};

use crate::rrule::{ByDay, Frequency, RRule};

/// Periods starting after this year are never expanded.
pub(crate) const MAX_YEAR: i32 = 9999;

#[derive(Clone, Copy)]
enum Scope {
    Month,
    Year,
}

impl RRule {
    /// Index of the period containing `t`, relative to the period containing
    /// `start`. Never negative.
    pub(crate) fn period_index_of(&self, start: DateTime<Utc>, t: DateTime<Utc>) -> Option<i64> {
        let units = match self.freq {
            Frequency::Yearly => i64::from(t.year() - start.year()),
            Frequency::Monthly => month_number(t) - month_number(start),
            Frequency::Weekly => {
                let a = week_first_day(start.date_naive(), self.week_start)?;
                let b = week_first_day(t.date_naive(), self.week_start)?;
                b.signed_duration_since(a).num_days() / 7
            }
            Frequency::Daily => t
                .date_naive()
                .signed_duration_since(start.date_naive())
                .num_days(),
            Frequency::Hourly => (truncate_hour(t)? - truncate_hour(start)?).num_hours(),
            Frequency::Minutely => (truncate_minute(t)? - truncate_minute(start)?).num_minutes(),
        };
        Some(units.div_euclid(i64::from(self.interval)).max(0))
    }

    /// First instant of period `index`. `None` past [`MAX_YEAR`].
    pub(crate) fn period_start(&self, start: DateTime<Utc>, index: i64) -> Option<DateTime<Utc>> {
        let step = index.checked_mul(i64::from(self.interval))?;
        let first = match self.freq {
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(start.year()).checked_add(step)?).ok()?;
                at_midnight(NaiveDate::from_ymd_opt(year, 1, 1)?)?
            }
            Frequency::Monthly => {
                let (year, month) = split_month_number(month_number(start).checked_add(step)?)?;
                at_midnight(NaiveDate::from_ymd_opt(year, month, 1)?)?
            }
            Frequency::Weekly => at_midnight(self.week_of_period(start, step)?)?,
            Frequency::Daily => at_midnight(add_days(start.date_naive(), step)?)?,
            Frequency::Hourly => truncate_hour(start)?.checked_add_signed(TimeDelta::try_hours(step)?)?,
            Frequency::Minutely => {
                truncate_minute(start)?.checked_add_signed(TimeDelta::try_minutes(step)?)?
            }
        };
        (first.year() <= MAX_YEAR).then_some(first)
    }

    /// Sorted, deduplicated candidates of period `index` after BYSETPOS.
    /// `None` once the period lies past [`MAX_YEAR`].
    pub(crate) fn period_occurrences(
        &self,
        start: DateTime<Utc>,
        index: i64,
    ) -> Option<Vec<DateTime<Utc>>> {
        let period = self.period_start(start, index)?;
        let mut out = Vec::new();

        match self.freq {
            Frequency::Yearly => {
                for date in self.yearly_dates(period.year(), start) {
                    self.push_times(&mut out, date, start, None, None);
                }
            }
            Frequency::Monthly => {
                for date in self.monthly_dates(period.year(), period.month(), start) {
                    self.push_times(&mut out, date, start, None, None);
                }
            }
            Frequency::Weekly => {
                for date in self.weekly_dates(period.date_naive(), start) {
                    self.push_times(&mut out, date, start, None, None);
                }
            }
            Frequency::Daily => {
                let date = period.date_naive();
                if self.passes_date_filters(date) {
                    self.push_times(&mut out, date, start, None, None);
                }
            }
            Frequency::Hourly => {
                let date = period.date_naive();
                if self.passes_date_filters(date) && contains_or_empty(&self.by_hour, period.hour()) {
                    self.push_times(&mut out, date, start, Some(period.hour()), None);
                }
            }
            Frequency::Minutely => {
                let date = period.date_naive();
                if self.passes_date_filters(date)
                    && contains_or_empty(&self.by_hour, period.hour())
                    && contains_or_empty(&self.by_minute, period.minute())
                {
                    self.push_times(&mut out, date, start, Some(period.hour()), Some(period.minute()));
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        Some(self.apply_set_pos(out))
    }

    /// Next period index worth expanding after period `index` produced
    /// nothing. DAILY and finer rules jump over days, hours and minutes their
    /// BYxxx limits exclude; coarser rules step one period at a time.
    pub(crate) fn next_viable_index(&self, start: DateTime<Utc>, index: i64) -> i64 {
        let step = index.saturating_add(1);
        let target = match self.freq {
            Frequency::Daily | Frequency::Hourly | Frequency::Minutely => self
                .period_start(start, index)
                .and_then(|period| self.skip_target(period)),
            _ => None,
        };
        let Some(target) = target else {
            return step;
        };
        match self.period_index_of(start, target) {
            Some(i) if self.period_start(start, i).is_some_and(|p| p < target) => (i + 1).max(step),
            Some(i) => i.max(step),
            None => step,
        }
    }

    /// Earliest instant after `period` that the date and time limits allow,
    /// when `period` itself is excluded by them.
    fn skip_target(&self, period: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = period.date_naive();
        if !contains_or_empty(&self.by_month, date.month()) {
            let (year, month) = split_month_number(month_number(period) + 1)?;
            return at_midnight(NaiveDate::from_ymd_opt(year, month, 1)?);
        }
        let next_day = || date.succ_opt().and_then(at_midnight);
        if !self.passes_date_filters(date) {
            return next_day();
        }
        if self.freq == Frequency::Daily {
            return None;
        }

        if !contains_or_empty(&self.by_hour, period.hour()) {
            return match self.by_hour.iter().copied().find(|h| *h > period.hour()) {
                Some(h) => at_midnight(date)?.checked_add_signed(TimeDelta::try_hours(i64::from(h))?),
                None => next_day(),
            };
        }
        if self.freq == Frequency::Minutely && !contains_or_empty(&self.by_minute, period.minute()) {
            let hour = truncate_hour(period)?;
            return match self.by_minute.iter().copied().find(|m| *m > period.minute()) {
                Some(m) => hour.checked_add_signed(TimeDelta::try_minutes(i64::from(m))?),
                None => hour.checked_add_signed(TimeDelta::try_hours(1)?),
            };
        }
        None
    }

    fn week_of_period(&self, start: DateTime<Utc>, step: i64) -> Option<NaiveDate> {
        let first = week_first_day(start.date_naive(), self.week_start)?;
        add_days(first, step.checked_mul(7)?)
    }

    fn yearly_dates(&self, year: i32, start: DateTime<Utc>) -> Vec<NaiveDate> {
        if self.by_month_day.is_empty() && self.by_day.is_empty() {
            let months = if self.by_month.is_empty() {
                vec![start.month()]
            } else {
                self.by_month.clone()
            };
            return months
                .into_iter()
                .filter_map(|m| NaiveDate::from_ymd_opt(year, m, start.day()))
                .collect();
        }

        if self.by_month.is_empty() && self.by_month_day.is_empty() {
            // BYDAY alone counts ordinals across the whole year.
            return days_of_year(year)
                .filter(|d| matches_by_day(*d, &self.by_day, Scope::Year))
                .collect();
        }

        let months: Vec<u32> = if self.by_month.is_empty() {
            (1..=12).collect()
        } else {
            self.by_month.clone()
        };
        months
            .into_iter()
            .flat_map(|m| self.month_days_matching(year, m))
            .collect()
    }

    fn monthly_dates(&self, year: i32, month: u32, start: DateTime<Utc>) -> Vec<NaiveDate> {
        if !contains_or_empty(&self.by_month, month) {
            return Vec::new();
        }
        if self.by_month_day.is_empty() && self.by_day.is_empty() {
            return NaiveDate::from_ymd_opt(year, month, start.day())
                .into_iter()
                .collect();
        }
        self.month_days_matching(year, month)
    }

    fn weekly_dates(&self, first: NaiveDate, start: DateTime<Utc>) -> Vec<NaiveDate> {
        (0..7)
            .filter_map(|i| first.checked_add_days(Days::new(i)))
            .filter(|d| {
                if self.by_day.is_empty() {
                    d.weekday() == start.weekday()
                } else {
                    self.by_day.iter().any(|b| b.weekday == d.weekday())
                }
            })
            .filter(|d| contains_or_empty(&self.by_month, d.month()))
            .filter(|d| self.by_month_day.is_empty() || matches_month_day(*d, &self.by_month_day))
            .collect()
    }

    fn month_days_matching(&self, year: i32, month: u32) -> Vec<NaiveDate> {
        days_of_month(year, month)
            .filter(|d| self.by_month_day.is_empty() || matches_month_day(*d, &self.by_month_day))
            .filter(|d| self.by_day.is_empty() || matches_by_day(*d, &self.by_day, Scope::Month))
            .collect()
    }

    /// BYMONTH / BYMONTHDAY / BYDAY used as limits (DAILY and finer).
    fn passes_date_filters(&self, date: NaiveDate) -> bool {
        contains_or_empty(&self.by_month, date.month())
            && (self.by_month_day.is_empty() || matches_month_day(date, &self.by_month_day))
            && (self.by_day.is_empty() || self.by_day.iter().any(|b| b.weekday == date.weekday()))
    }

    fn push_times(
        &self,
        out: &mut Vec<DateTime<Utc>>,
        date: NaiveDate,
        start: DateTime<Utc>,
        fixed_hour: Option<u32>,
        fixed_minute: Option<u32>,
    ) {
        let hours = fixed_hour.map_or_else(|| or_default(&self.by_hour, start.hour()), |h| vec![h]);
        let minutes =
            fixed_minute.map_or_else(|| or_default(&self.by_minute, start.minute()), |m| vec![m]);
        let seconds = or_default(&self.by_second, start.second());

        for h in &hours {
            for m in &minutes {
                for s in &seconds {
                    if let Some(naive) = date.and_hms_opt(*h, *m, *s) {
                        out.push(Utc.from_utc_datetime(&naive));
                    }
                }
            }
        }
    }

    fn apply_set_pos(&self, occurrences: Vec<DateTime<Utc>>) -> Vec<DateTime<Utc>> {
        if self.by_set_pos.is_empty() {
            return occurrences;
        }
        let len = occurrences.len() as i64;
        let mut picked: Vec<DateTime<Utc>> = self
            .by_set_pos
            .iter()
            .filter_map(|&pos| {
                let idx = if pos > 0 { i64::from(pos) - 1 } else { len + i64::from(pos) };
                usize::try_from(idx).ok().and_then(|i| occurrences.get(i).copied())
            })
            .collect();
        picked.sort_unstable();
        picked.dedup();
        picked
    }
}

fn contains_or_empty(list: &[u32], value: u32) -> bool {
    list.is_empty() || list.contains(&value)
}

fn or_default(list: &[u32], fallback: u32) -> Vec<u32> {
    if list.is_empty() {
        vec![fallback]
    } else {
        list.to_vec()
    }
}

fn matches_month_day(date: NaiveDate, month_days: &[i32]) -> bool {
    let day = date.day() as i32;
    let len = days_in_month(date.year(), date.month()) as i32;
    month_days
        .iter()
        .any(|&md| if md > 0 { day == md } else { day == len + md + 1 })
}

fn matches_by_day(date: NaiveDate, by_day: &[ByDay], scope: Scope) -> bool {
    by_day.iter().any(|b| {
        if b.weekday != date.weekday() {
            return false;
        }
        let Some(n) = b.ordinal else {
            return true;
        };
        let (index0, len) = match scope {
            Scope::Month => (date.day0(), days_in_month(date.year(), date.month())),
            Scope::Year => (date.ordinal0(), days_in_year(date.year())),
        };
        if n > 0 {
            (index0 / 7 + 1) as i32 == n
        } else {
            ((len - 1 - index0) / 7 + 1) as i32 == -n
        }
    })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

fn days_in_year(year: i32) -> u32 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

fn days_of_month(year: i32, month: u32) -> impl Iterator<Item = NaiveDate> {
    (1..=days_in_month(year, month)).filter_map(move |d| NaiveDate::from_ymd_opt(year, month, d))
}

fn days_of_year(year: i32) -> impl Iterator<Item = NaiveDate> {
    (1..=days_in_year(year)).filter_map(move |o| NaiveDate::from_yo_opt(year, o))
}

fn week_first_day(date: NaiveDate, week_start: Weekday) -> Option<NaiveDate> {
    let back = (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    date.checked_sub_days(Days::new(u64::from(back)))
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(u64::try_from(days).ok()?))
}

fn month_number(dt: DateTime<Utc>) -> i64 {
    i64::from(dt.year()) * 12 + i64::from(dt.month0())
}

fn split_month_number(n: i64) -> Option<(i32, u32)> {
    let year = i32::try_from(n.div_euclid(12)).ok()?;
    Some((year, n.rem_euclid(12) as u32 + 1))
}

fn at_midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn truncate_hour(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dt.with_minute(0)?.with_second(0)?.with_nanosecond(0)
}

fn truncate_minute(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dt.with_second(0)?.with_nanosecond(0)
}
