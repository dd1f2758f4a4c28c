//! Recurrence parsing from free text and from the strict mini-grammar.
//!
//! Free-text parsing recognizes Russian recurrence cues («каждый день»,
//! «по будням», «по средам», «каждые 2 недели», «15 числа», «3 раза»,
//! «до 31.12», «кроме 10.03 и 17.03»). Text with no recognized cue parses
//! to `None`, which means "one-shot" — callers must not treat it as a
//! failure.
//!
//! The strict grammar is the typed equivalent used by action payloads:
//! `none | daily[/N] | weekdays[/N] | weekly[:d,d,...][/N] | monthly:<day>[/N]`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::{RecurrenceError, Result};

use super::spec::{resolve_local, Frequency, RecurrenceSpec};

// ============================================================================
// Types
// ============================================================================

/// A parsed free-text recurrence: the spec plus any excluded dates.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecurrence {
    /// The structured recurrence.
    pub spec: RecurrenceSpec,
    /// Dates excluded by an «except» phrase, as local calendar dates.
    pub exdates: Vec<NaiveDate>,
}

// ============================================================================
// Parser
// ============================================================================

/// Free-text recurrence parser.
pub struct RecurrenceParser {
    /// Reference date for year inference in «до»/«кроме» phrases.
    reference_date: NaiveDate,
    /// Timezone used to anchor the `until` bound.
    timezone: Tz,
}

impl RecurrenceParser {
    /// Create a parser with the current date as the reference.
    pub fn new(timezone: Tz) -> Self {
        Self {
            reference_date: Utc::now().with_timezone(&timezone).date_naive(),
            timezone,
        }
    }

    /// Create a parser with a fixed reference date.
    pub fn with_reference_date(reference_date: NaiveDate, timezone: Tz) -> Self {
        Self {
            reference_date,
            timezone,
        }
    }

    /// Parse free text into a recurrence, or `None` if no cue is present.
    pub fn parse(&self, text: &str) -> Result<Option<ParsedRecurrence>> {
        let lower = text.to_lowercase();

        let (interval, unit_hint) = self.parse_interval(&lower);
        let weekday_list = weekday_stems(&lower);
        let monthday = self.parse_monthday(&lower)?;

        let freq = if !weekday_list.is_empty() {
            Some(Frequency::Weekly)
        } else if lower.contains("по будням")
            || lower.contains("в будни")
            || lower.contains("по рабочим дням")
        {
            Some(Frequency::Weekdays)
        } else if monthday.is_some()
            || lower.contains("каждый месяц")
            || lower.contains("ежемесячно")
            || unit_hint == Some(Unit::Month)
        {
            Some(Frequency::Monthly)
        } else if lower.contains("каждую неделю")
            || lower.contains("еженедельно")
            || unit_hint == Some(Unit::Week)
        {
            Some(Frequency::Weekly)
        } else if lower.contains("каждый день")
            || lower.contains("ежедневно")
            || unit_hint == Some(Unit::Day)
        {
            Some(Frequency::Daily)
        } else {
            None
        };

        let Some(freq) = freq else {
            // No recognized cue: one-shot, not an error.
            return Ok(None);
        };

        let mut spec = match freq {
            Frequency::Daily => RecurrenceSpec::daily(),
            Frequency::Weekdays => RecurrenceSpec::weekdays(),
            Frequency::Weekly => {
                if weekday_list.is_empty() {
                    RecurrenceSpec::weekly()
                } else {
                    RecurrenceSpec::weekly_on(weekday_list)
                }
            }
            Frequency::Monthly => match monthday {
                Some(day) => RecurrenceSpec::monthly_on(day),
                None => RecurrenceSpec {
                    freq: Frequency::Monthly,
                    ..RecurrenceSpec::daily()
                },
            },
        };

        if let Some(interval) = interval {
            if interval == 0 {
                return Err(RecurrenceError::IntervalOutOfRange(interval).into());
            }
            spec = spec.every(interval);
        }
        if let Some(count) = self.parse_count(&lower)? {
            spec = spec.times(count);
        }
        if let Some(until) = self.parse_until(&lower)? {
            spec = spec.until(until);
        }
        spec.validate()?;

        let exdates = self.parse_exdates(&lower)?;
        Ok(Some(ParsedRecurrence { spec, exdates }))
    }

    fn parse_interval(&self, lower: &str) -> (Option<u32>, Option<Unit>) {
        let re = Regex::new(r"кажд(?:ые|ый|ую|ое)\s+(\d+)\s+(дн|недел|месяц)")
            .expect("Invalid regex");
        if let Some(cap) = re.captures(lower) {
            let n = cap[1].parse::<u32>().ok();
            let unit = match &cap[2] {
                "дн" => Unit::Day,
                "недел" => Unit::Week,
                _ => Unit::Month,
            };
            return (n, Some(unit));
        }
        (None, None)
    }

    fn parse_monthday(&self, lower: &str) -> Result<Option<u32>> {
        let re = Regex::new(r"(\d{1,2})(?:-?го)?\s+числ[ао]").expect("Invalid regex");
        if let Some(cap) = re.captures(lower) {
            let day: u32 = cap[1]
                .parse()
                .map_err(|_| RecurrenceError::BadDate(cap[1].to_string()))?;
            if !(1..=31).contains(&day) {
                return Err(RecurrenceError::MonthdayOutOfRange(day).into());
            }
            return Ok(Some(day));
        }
        Ok(None)
    }

    fn parse_count(&self, lower: &str) -> Result<Option<u32>> {
        let re = Regex::new(r"(\d+)\s+раз").expect("Invalid regex");
        if let Some(cap) = re.captures(lower) {
            let count: u32 = cap[1]
                .parse()
                .map_err(|_| RecurrenceError::Grammar(cap[1].to_string()))?;
            if count == 0 {
                return Err(
                    RecurrenceError::Grammar("количество повторов должно быть не меньше 1".to_string())
                        .into(),
                );
            }
            return Ok(Some(count));
        }
        Ok(None)
    }

    fn parse_until(&self, lower: &str) -> Result<Option<DateTime<Utc>>> {
        let re = Regex::new(r"до\s+(\d{4}-\d{2}-\d{2}|\d{1,2}\.\d{1,2}(?:\.\d{2,4})?)")
            .expect("Invalid regex");
        if let Some(cap) = re.captures(lower) {
            let date = self.parse_date_fragment(&cap[1])?;
            // The bound covers the whole local day.
            let end_of_day = resolve_local(
                self.timezone,
                NaiveDateTime::new(date, NaiveTime::from_hms_opt(23, 59, 59).expect("valid time")),
            );
            return Ok(Some(end_of_day.with_timezone(&Utc)));
        }
        Ok(None)
    }

    fn parse_exdates(&self, lower: &str) -> Result<Vec<NaiveDate>> {
        let re = Regex::new(r"кроме\s+((?:\d{1,2}\.\d{1,2}(?:\.\d{2,4})?|\d{4}-\d{2}-\d{2})(?:(?:\s*,\s*|\s+и\s+)(?:\d{1,2}\.\d{1,2}(?:\.\d{2,4})?|\d{4}-\d{2}-\d{2}))*)")
            .expect("Invalid regex");
        let Some(cap) = re.captures(lower) else {
            return Ok(Vec::new());
        };
        let mut dates = Vec::new();
        for fragment in cap[1].split([',']).flat_map(|s| s.split(" и ")) {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            dates.push(self.parse_date_fragment(fragment)?);
        }
        Ok(dates)
    }

    /// Parse `YYYY-MM-DD`, `DD.MM.YYYY` or `DD.MM` (year from reference).
    fn parse_date_fragment(&self, fragment: &str) -> Result<NaiveDate> {
        if let Ok(date) = NaiveDate::parse_from_str(fragment, "%Y-%m-%d") {
            return Ok(date);
        }
        let parts: Vec<&str> = fragment.split('.').collect();
        let bad = || RecurrenceError::BadDate(fragment.to_string());
        match parts.as_slice() {
            [d, m] => {
                let day: u32 = d.parse().map_err(|_| bad())?;
                let month: u32 = m.parse().map_err(|_| bad())?;
                NaiveDate::from_ymd_opt(self.reference_date.year(), month, day)
                    .ok_or_else(|| bad().into())
            }
            [d, m, y] => {
                let day: u32 = d.parse().map_err(|_| bad())?;
                let month: u32 = m.parse().map_err(|_| bad())?;
                let mut year: i32 = y.parse().map_err(|_| bad())?;
                if year < 100 {
                    year += 2000;
                }
                NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| bad().into())
            }
            _ => Err(bad().into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Day,
    Week,
    Month,
}

/// Weekday stems matched in free text (declension-tolerant).
const WEEKDAY_STEMS: [(&str, u8); 7] = [
    ("понедельник", 0),
    ("вторник", 1),
    ("сред", 2),
    ("четверг", 3),
    ("пятниц", 4),
    ("суббот", 5),
    ("воскресень", 6),
];

fn weekday_stems(lower: &str) -> Vec<u8> {
    let mut days: Vec<u8> = WEEKDAY_STEMS
        .iter()
        .filter(|(stem, _)| lower.contains(stem))
        .map(|&(_, day)| day)
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

// ============================================================================
// Strict mini-grammar
// ============================================================================

/// Parse the strict recurrence grammar.
///
/// `none | daily[/N] | weekdays[/N] | weekly[:d,d,...][/N] | monthly:<day>[/N]`
/// with `d` in 0-6 (Monday = 0) and `N >= 1`. `none` parses to `Ok(None)`.
pub fn parse_strict(text: &str) -> Result<Option<RecurrenceSpec>> {
    let t = text.trim().to_lowercase();
    if t == "none" || t == "нет" {
        return Ok(None);
    }

    let (base, interval) = match t.split_once('/') {
        Some((base, n)) => {
            let interval: u32 = n.parse().map_err(|_| {
                RecurrenceError::Grammar(format!("интервал должен быть числом, а не «{n}»"))
            })?;
            if interval < 1 {
                return Err(RecurrenceError::IntervalOutOfRange(interval).into());
            }
            (base, interval)
        }
        None => (t.as_str(), 1),
    };

    let spec = if base == "daily" {
        RecurrenceSpec::daily()
    } else if base == "weekdays" {
        RecurrenceSpec::weekdays()
    } else if base == "weekly" {
        RecurrenceSpec::weekly()
    } else if let Some(days) = base.strip_prefix("weekly:") {
        let mut parsed = Vec::new();
        for d in days.split(',') {
            let day: u32 = d.trim().parse().map_err(|_| {
                RecurrenceError::Grammar(format!("день недели должен быть числом 0-6, а не «{d}»"))
            })?;
            if day > 6 {
                return Err(RecurrenceError::WeekdayOutOfRange(day).into());
            }
            parsed.push(day as u8);
        }
        if parsed.is_empty() {
            return Err(RecurrenceError::Grammar(
                "укажите хотя бы один день недели, например weekly:0,2".to_string(),
            )
            .into());
        }
        RecurrenceSpec::weekly_on(parsed)
    } else if let Some(day) = base.strip_prefix("monthly:") {
        let day: u32 = day.trim().parse().map_err(|_| {
            RecurrenceError::Grammar(format!("день месяца должен быть числом 1-31, а не «{day}»"))
        })?;
        if !(1..=31).contains(&day) {
            return Err(RecurrenceError::MonthdayOutOfRange(day).into());
        }
        RecurrenceSpec::monthly_on(day)
    } else {
        return Err(RecurrenceError::Grammar(format!(
            "«{base}»; примеры: none, daily, weekdays, weekly:0,2,4, monthly:15, daily/2"
        ))
        .into());
    };

    let spec = spec.every(interval);
    spec.validate()?;
    Ok(Some(spec))
}

// ============================================================================
// Tests
// ============================================================================
