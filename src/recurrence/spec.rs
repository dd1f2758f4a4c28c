//! Structured recurrence specification and occurrence arithmetic.
//!
//! A [`RecurrenceSpec`] captures one of four shapes — daily, weekly
//! (optionally on specific weekdays), weekdays-only, or monthly on a day
//! of month — plus an interval and optional termination bounds. Absence of
//! a spec means "one-shot"; that is modeled by `Option<RecurrenceSpec>`
//! at the call sites, never by a sentinel value here.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{RecurrenceError, Result};

// ============================================================================
// Types
// ============================================================================

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Every day (or every N days).
    Daily,
    /// Every week, optionally restricted to specific weekdays.
    Weekly,
    /// Monday through Friday.
    Weekdays,
    /// Every month on a specific day of month.
    Monthly,
}

/// Largest accepted interval. Occurrence scans walk day by day through one
/// full interval, so the interval has to stay within sane bounds.
const MAX_INTERVAL: u32 = 1000;

/// A structured recurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecurrenceSpec {
    /// The recurrence frequency.
    pub freq: Frequency,
    /// Interval between occurrences (every N units, 1-1000).
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Weekday codes for weekly recurrences (0 = Monday .. 6 = Sunday).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_weekday: Vec<u8>,
    /// Day of month (1-31) for monthly recurrences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_monthday: Option<u32>,
    /// Maximum number of remaining occurrences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Last instant (inclusive) an occurrence may fall on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceSpec {
    /// Create a daily recurrence.
    pub fn daily() -> Self {
        Self {
            freq: Frequency::Daily,
            interval: 1,
            by_weekday: Vec::new(),
            by_monthday: None,
            count: None,
            until: None,
        }
    }

    /// Create a weekly recurrence without weekday restriction.
    pub fn weekly() -> Self {
        Self {
            freq: Frequency::Weekly,
            ..Self::daily()
        }
    }

    /// Create a weekly recurrence on specific weekdays (0 = Monday).
    pub fn weekly_on(days: impl IntoIterator<Item = u8>) -> Self {
        let mut by_weekday: Vec<u8> = days.into_iter().collect();
        by_weekday.sort_unstable();
        by_weekday.dedup();
        Self {
            freq: Frequency::Weekly,
            by_weekday,
            ..Self::daily()
        }
    }

    /// Create a Monday-through-Friday recurrence.
    pub fn weekdays() -> Self {
        Self {
            freq: Frequency::Weekdays,
            ..Self::daily()
        }
    }

    /// Create a monthly recurrence on a day of month.
    pub fn monthly_on(day: u32) -> Self {
        Self {
            freq: Frequency::Monthly,
            by_monthday: Some(day),
            ..Self::daily()
        }
    }

    /// Set the interval.
    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Set the occurrence count.
    pub fn times(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the end bound.
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Validate the exactly-one-shape invariant and numeric ranges.
    pub fn validate(&self) -> Result<()> {
        if self.interval < 1 || self.interval > MAX_INTERVAL {
            return Err(RecurrenceError::IntervalOutOfRange(self.interval).into());
        }
        for &d in &self.by_weekday {
            if d > 6 {
                return Err(RecurrenceError::WeekdayOutOfRange(d as u32).into());
            }
        }
        if !self.by_weekday.is_empty() && self.freq != Frequency::Weekly {
            return Err(RecurrenceError::InvalidShape(
                "weekday list is only valid for weekly recurrences".to_string(),
            )
            .into());
        }
        if let Some(day) = self.by_monthday {
            if self.freq != Frequency::Monthly {
                return Err(RecurrenceError::InvalidShape(
                    "day of month is only valid for monthly recurrences".to_string(),
                )
                .into());
            }
            if !(1..=31).contains(&day) {
                return Err(RecurrenceError::MonthdayOutOfRange(day).into());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Occurrence arithmetic
    // ========================================================================

    /// Compute the next occurrence strictly after `after`.
    ///
    /// `anchor` is the series' reference occurrence: it supplies the local
    /// time of day and the phase for interval alignment (every-2-weeks stays
    /// on the anchor's week parity even when the query point drifts). All
    /// arithmetic happens on local dates in the anchor's timezone, so the
    /// occurrence keeps its wall-clock time across DST transitions.
    ///
    /// Returns `None` when the `until` bound cuts the series off.
    pub fn next_occurrence(
        &self,
        after: DateTime<Tz>,
        anchor: DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        let tz = anchor.timezone();
        let time = anchor.time();
        let anchor_date = anchor.date_naive();
        let after_local = after.with_timezone(&tz);
        let interval = self.interval.max(1) as i64;

        let candidate = match self.freq {
            Frequency::Daily => {
                let elapsed = (after_local.date_naive() - anchor_date).num_days();
                let mut k = (elapsed / interval).max(0);
                loop {
                    let date = anchor_date + Duration::days(k * interval);
                    let dt = resolve_local(tz, NaiveDateTime::new(date, time));
                    if dt > after {
                        break Some(dt);
                    }
                    k += 1;
                }
            }
            Frequency::Weekly | Frequency::Weekdays => {
                let days: Vec<u8> = if self.freq == Frequency::Weekdays {
                    vec![0, 1, 2, 3, 4]
                } else if self.by_weekday.is_empty() {
                    vec![anchor_date.weekday().num_days_from_monday() as u8]
                } else {
                    self.by_weekday.clone()
                };
                let anchor_week = week_start(anchor_date);
                let start = anchor_date.max(after_local.date_naive());
                let mut found = None;
                // One full interval of weeks plus slack always contains the
                // next aligned weekday.
                for offset in 0..(interval * 7 + 14) {
                    let date = start + Duration::days(offset);
                    let dow = date.weekday().num_days_from_monday() as u8;
                    if !days.contains(&dow) {
                        continue;
                    }
                    let weeks = (week_start(date) - anchor_week).num_days() / 7;
                    if weeks % interval != 0 {
                        continue;
                    }
                    let dt = resolve_local(tz, NaiveDateTime::new(date, time));
                    if dt > after {
                        found = Some(dt);
                        break;
                    }
                }
                found
            }
            Frequency::Monthly => {
                let day = self.by_monthday.unwrap_or(anchor_date.day());
                let months_elapsed = (after_local.year() as i64 - anchor_date.year() as i64) * 12
                    + (after_local.month() as i64 - anchor_date.month() as i64);
                let mut k = (months_elapsed / interval - 1).max(0);
                let mut found = None;
                // Bounded scan; invalid dates (Feb 31) skip to the next
                // matching month.
                for _ in 0..600 {
                    let (year, month) = add_months(
                        anchor_date.year(),
                        anchor_date.month(),
                        k * interval,
                    );
                    k += 1;
                    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                        continue;
                    };
                    let dt = resolve_local(tz, NaiveDateTime::new(date, time));
                    if dt > after {
                        found = Some(dt);
                        break;
                    }
                }
                found
            }
        };

        let dt = candidate?;
        if let Some(until) = self.until {
            if dt.with_timezone(&Utc) > until {
                return None;
            }
        }
        Some(dt)
    }

    // ========================================================================
    // Display
    // ========================================================================

    /// Render the single human-readable label for this recurrence.
    ///
    /// This is the only place recurrence fields are formatted for users;
    /// every prompt, summary and list view goes through it.
    pub fn label(&self) -> String {
        let n = self.interval.max(1);
        let mut label = match self.freq {
            Frequency::Daily => {
                if n == 1 {
                    "каждый день".to_string()
                } else {
                    format!("каждые {} {}", n, plural(n, "день", "дня", "дней"))
                }
            }
            Frequency::Weekdays => {
                if n == 1 {
                    "по будням".to_string()
                } else {
                    format!(
                        "по будням каждые {} {}",
                        n,
                        plural(n, "неделю", "недели", "недель")
                    )
                }
            }
            Frequency::Weekly => {
                let base = if n == 1 {
                    "каждую неделю".to_string()
                } else {
                    format!("каждые {} {}", n, plural(n, "неделю", "недели", "недель"))
                };
                if self.by_weekday.is_empty() {
                    base
                } else {
                    format!("{} {}", base, weekday_phrase(&self.by_weekday))
                }
            }
            Frequency::Monthly => {
                let day_part = self
                    .by_monthday
                    .map(|d| format!(" {} числа", d))
                    .unwrap_or_default();
                if n == 1 {
                    format!("каждый месяц{}", day_part)
                } else {
                    format!(
                        "каждые {} {}{}",
                        n,
                        plural(n, "месяц", "месяца", "месяцев"),
                        day_part
                    )
                }
            }
        };

        if let Some(count) = self.count {
            label.push_str(&format!(", {} {}", count, plural(count, "раз", "раза", "раз")));
        }
        if let Some(until) = self.until {
            label.push_str(&format!(", до {}", until.format("%d.%m.%Y")));
        }
        label
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Dative-plural weekday names used in labels («по средам»).
const WEEKDAY_DATIVE: [&str; 7] = [
    "понедельникам",
    "вторникам",
    "средам",
    "четвергам",
    "пятницам",
    "субботам",
    "воскресеньям",
];

fn weekday_phrase(days: &[u8]) -> String {
    let names: Vec<&str> = days
        .iter()
        .filter(|&&d| d <= 6)
        .map(|&d| WEEKDAY_DATIVE[d as usize])
        .collect();
    match names.len() {
        0 => String::new(),
        1 => format!("по {}", names[0]),
        _ => {
            let (last, init) = names.split_last().expect("non-empty");
            format!("по {} и {}", init.join(", "), last)
        }
    }
}

/// Russian cardinal plural selection.
fn plural<'a>(n: u32, one: &'a str, few: &'a str, many: &'a str) -> &'a str {
    let tail = n % 100;
    if (11..=14).contains(&tail) {
        return many;
    }
    match tail % 10 {
        1 => one,
        2..=4 => few,
        _ => many,
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn add_months(year: i32, month: u32, months: i64) -> (i32, u32) {
    let total = year as i64 * 12 + (month as i64 - 1) + months;
    ((total.div_euclid(12)) as i32, (total.rem_euclid(12) + 1) as u32)
}

/// Resolve a local wall-clock time to an instant in `tz`.
///
/// DST fold resolves to the earliest instant; a nonexistent time in the
/// spring-forward gap advances hour by hour until valid.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut candidate = naive;
            loop {
                candidate += Duration::hours(1);
                match tz.from_local_datetime(&candidate) {
                    LocalResult::Single(dt) => return dt,
                    LocalResult::Ambiguous(earliest, _) => return earliest,
                    LocalResult::None => continue,
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use chrono_tz::Europe::{Berlin, Moscow};

    fn at(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        resolve_local(
            tz,
            NaiveDateTime::new(
                NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
                NaiveTime::from_hms_opt(h, mi, 0).unwrap(),
            ),
        )
    }

    #[test]
    fn test_daily_next_in_moscow() {
        let spec = RecurrenceSpec::daily();
        let anchor = at(Moscow, 2026, 2, 5, 10, 0);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next, at(Moscow, 2026, 2, 6, 10, 0));
    }

    #[test]
    fn test_daily_interval_alignment_after_late_query() {
        let spec = RecurrenceSpec::daily().every(3);
        let anchor = at(Moscow, 2026, 2, 1, 9, 0);
        // Query far past several slots: phase must stay on the 1st, 4th, 7th...
        let after = at(Moscow, 2026, 2, 5, 12, 0);
        let next = spec.next_occurrence(after, anchor).unwrap();
        assert_eq!(next, at(Moscow, 2026, 2, 7, 9, 0));
    }

    #[test]
    fn test_weekly_on_wednesdays_every_two_weeks() {
        let spec = RecurrenceSpec::weekly_on([2]).every(2);
        // 2026-02-04 is a Wednesday.
        let anchor = at(Moscow, 2026, 2, 4, 18, 30);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next, at(Moscow, 2026, 2, 18, 18, 30));
        // And the one after keeps the same parity.
        let next2 = spec.next_occurrence(next, anchor).unwrap();
        assert_eq!(next2, at(Moscow, 2026, 3, 4, 18, 30));
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        let spec = RecurrenceSpec::weekdays();
        // 2026-02-06 is a Friday.
        let anchor = at(Moscow, 2026, 2, 6, 8, 0);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next, at(Moscow, 2026, 2, 9, 8, 0)); // Monday
    }

    #[test]
    fn test_monthly_skips_short_months() {
        let spec = RecurrenceSpec::monthly_on(31);
        let anchor = at(Moscow, 2026, 1, 31, 12, 0);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        // February has no 31st; March does.
        assert_eq!(next, at(Moscow, 2026, 3, 31, 12, 0));
    }

    #[test]
    fn test_until_bound_terminates() {
        let until = at(Moscow, 2026, 2, 7, 23, 59).with_timezone(&Utc);
        let spec = RecurrenceSpec::daily().until(until);
        let anchor = at(Moscow, 2026, 2, 5, 10, 0);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next, at(Moscow, 2026, 2, 6, 10, 0));
        let after = at(Moscow, 2026, 2, 7, 10, 0);
        assert!(spec.next_occurrence(after, anchor).is_none());
    }

    #[test]
    fn test_wall_clock_stable_across_dst() {
        let spec = RecurrenceSpec::daily();
        // Berlin springs forward on 2026-03-29.
        let anchor = at(Berlin, 2026, 3, 28, 9, 0);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next.time(), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 29).unwrap());
    }

    #[test]
    fn test_nonexistent_local_time_advances() {
        // 02:30 does not exist in Berlin on 2026-03-29.
        let spec = RecurrenceSpec::daily();
        let anchor = at(Berlin, 2026, 3, 28, 2, 30);
        let next = spec.next_occurrence(anchor, anchor).unwrap();
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 29).unwrap());
        assert_eq!(next.time(), NaiveTime::from_hms_opt(3, 30, 0).unwrap());
    }

    #[test]
    fn test_label_two_weeks_wednesdays() {
        let spec = RecurrenceSpec::weekly_on([2]).every(2);
        assert_eq!(spec.label(), "каждые 2 недели по средам");
    }

    #[test]
    fn test_label_variants() {
        assert_eq!(RecurrenceSpec::daily().label(), "каждый день");
        assert_eq!(RecurrenceSpec::daily().every(5).label(), "каждые 5 дней");
        assert_eq!(RecurrenceSpec::weekdays().label(), "по будням");
        assert_eq!(RecurrenceSpec::weekly().label(), "каждую неделю");
        assert_eq!(
            RecurrenceSpec::weekly_on([0, 2, 4]).label(),
            "каждую неделю по понедельникам, средам и пятницам"
        );
        assert_eq!(
            RecurrenceSpec::monthly_on(15).label(),
            "каждый месяц 15 числа"
        );
        assert_eq!(RecurrenceSpec::daily().times(3).label(), "каждый день, 3 раза");
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(RecurrenceSpec::weekly_on([7]).validate().is_err());
        assert!(RecurrenceSpec::monthly_on(0).validate().is_err());
        assert!(RecurrenceSpec::monthly_on(32).validate().is_err());
        assert!(RecurrenceSpec::daily().every(0).validate().is_err());
        assert!(RecurrenceSpec::daily().every(1001).validate().is_err());
        assert!(RecurrenceSpec::daily().every(1000).validate().is_ok());
        let mut bad = RecurrenceSpec::weekdays();
        bad.by_weekday = vec![0];
        assert!(bad.validate().is_err());
    }
}
