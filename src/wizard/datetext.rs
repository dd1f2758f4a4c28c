//! Date-phrase extraction from free text.
//!
//! Supports the date step of the wizards («2026-03-15 09:00», «15.03 в 9»,
//! «завтра в 9», «через 30 минут», «в пятницу») and the add-wizard fast
//! path, where a single message carries both a date phrase and a title
//! («завтра в 9 купить молоко» → instant + «купить молоко»).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::recurrence::resolve_local;

/// Default wall-clock time when a phrase names a date but no time.
const DEFAULT_TIME: (u32, u32) = (9, 0);

/// A date phrase found inside a longer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTextMatch {
    /// The resolved instant in the parser's timezone.
    pub instant: DateTime<Tz>,
    /// The text with the date phrase removed.
    pub title: String,
}

/// Parser for date phrases, anchored at a reference instant.
pub struct DateTextParser {
    reference: DateTime<Tz>,
}

impl DateTextParser {
    /// Create a parser anchored at the current instant in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self {
            reference: Utc::now().with_timezone(&timezone),
        }
    }

    /// Create a parser anchored at a fixed instant.
    pub fn with_reference(reference: DateTime<Tz>) -> Self {
        Self { reference }
    }

    /// Parse a text that should be (mostly) a date phrase.
    ///
    /// Surrounding words are ignored; returns `None` when no date or time
    /// component is recognized.
    pub fn parse_datetime(&self, text: &str) -> Option<DateTime<Tz>> {
        self.find_instant(&text.to_lowercase())
            .map(|(instant, _)| instant)
    }

    /// Extract a date phrase and the residual title from one message.
    ///
    /// Returns `None` unless both a date/time and a non-empty residual are
    /// present — the fast path only applies when one message carries both.
    pub fn extract(&self, text: &str) -> Option<DateTextMatch> {
        let (lower, offsets) = lowercase_with_offsets(text);
        let (instant, found) = self.find_instant(&lower)?;
        // Spans were found in the lowered string; map them back to the
        // original before slicing it.
        let mut spans: Vec<(usize, usize)> = found
            .iter()
            .map(|&(s, e)| (offsets[s], offsets[e]))
            .collect();
        spans.sort_by_key(|&(s, _)| s);

        let mut title = String::new();
        let mut cursor = 0;
        for &(start, end) in &spans {
            if start > cursor {
                title.push_str(&text[cursor..start]);
            }
            cursor = cursor.max(end);
        }
        title.push_str(&text[cursor..]);

        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        let title = title
            .trim_matches(|c: char| c == ',' || c == '.' || c == '-')
            .trim()
            .to_string();
        if title.is_empty() {
            return None;
        }
        Some(DateTextMatch { instant, title })
    }

    /// Locate date/time components in an already-lowercased text, returning
    /// the byte spans they occupy within it.
    fn find_instant(&self, lower: &str) -> Option<(DateTime<Tz>, Vec<(usize, usize)>)> {
        let tz = self.reference.timezone();

        // Relative offsets are complete phrases on their own.
        let relative = Regex::new(r"через\s+(\d+)\s+(минут\w*|час\w*|дн\w*|день)")
            .expect("Invalid regex");
        if let Some(cap) = relative.captures(&lower) {
            let n: i64 = cap[1].parse().ok()?;
            let unit = &cap[2];
            let delta = if unit.starts_with("минут") {
                Duration::minutes(n)
            } else if unit.starts_with("час") {
                Duration::hours(n)
            } else {
                Duration::days(n)
            };
            let m = cap.get(0).expect("whole match");
            return Some((self.reference + delta, vec![(m.start(), m.end())]));
        }

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut date: Option<NaiveDate> = None;
        let mut time: Option<NaiveTime> = None;

        // Explicit dates first, so their digits are not mistaken for hours.
        let iso = Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("Invalid regex");
        if let Some(cap) = iso.captures(&lower) {
            let d = NaiveDate::from_ymd_opt(
                cap[1].parse().ok()?,
                cap[2].parse().ok()?,
                cap[3].parse().ok()?,
            )?;
            let m = cap.get(0).expect("whole match");
            spans.push((m.start(), m.end()));
            date = Some(d);
        }

        if date.is_none() {
            let dotted =
                Regex::new(r"\b(\d{1,2})\.(\d{1,2})(?:\.(\d{2,4}))?\b").expect("Invalid regex");
            if let Some(cap) = dotted.captures(&lower) {
                let day: u32 = cap[1].parse().ok()?;
                let month: u32 = cap[2].parse().ok()?;
                let d = match cap.get(3) {
                    Some(y) => {
                        let mut year: i32 = y.as_str().parse().ok()?;
                        if year < 100 {
                            year += 2000;
                        }
                        NaiveDate::from_ymd_opt(year, month, day)?
                    }
                    None => {
                        // Year omitted: the nearest such date that is not past.
                        let this_year =
                            NaiveDate::from_ymd_opt(self.reference.year(), month, day)?;
                        if this_year < self.reference.date_naive() {
                            NaiveDate::from_ymd_opt(self.reference.year() + 1, month, day)?
                        } else {
                            this_year
                        }
                    }
                };
                let m = cap.get(0).expect("whole match");
                spans.push((m.start(), m.end()));
                date = Some(d);
            }
        }

        if date.is_none() {
            for (word, days) in [("послезавтра", 2i64), ("завтра", 1), ("сегодня", 0)] {
                if let Some(pos) = lower.find(word) {
                    // «послезавтра» contains «завтра»; skip the inner match.
                    if word == "завтра"
                        && lower[..pos].ends_with("после")
                    {
                        continue;
                    }
                    spans.push((pos, pos + word.len()));
                    date = Some(self.reference.date_naive() + Duration::days(days));
                    break;
                }
            }
        }

        if date.is_none() {
            if let Some((d, span)) = self.find_weekday(&lower) {
                spans.push(span);
                date = Some(d);
            }
        }

        // Times, skipping anything already claimed by a date span.
        let clock = Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("Invalid regex");
        for cap in clock.captures_iter(&lower) {
            let m = cap.get(0).expect("whole match");
            if overlaps(&spans, m.start(), m.end()) {
                continue;
            }
            if let Some(t) =
                NaiveTime::from_hms_opt(cap[1].parse().ok()?, cap[2].parse().ok()?, 0)
            {
                spans.push((m.start(), m.end()));
                time = Some(t);
                break;
            }
        }
        if time.is_none() {
            let bare_hour = Regex::new(r"(?:^|[\s,])в\s+(\d{1,2})(?:\s+час(?:а|ов)?)?\b")
                .expect("Invalid regex");
            for cap in bare_hour.captures_iter(&lower) {
                let m = cap.get(0).expect("whole match");
                if overlaps(&spans, m.start(), m.end()) {
                    continue;
                }
                let hour: u32 = cap[1].parse().ok()?;
                if let Some(t) = NaiveTime::from_hms_opt(hour, 0, 0) {
                    spans.push((m.start(), m.end()));
                    time = Some(t);
                    break;
                }
            }
        }

        if date.is_none() && time.is_none() {
            return None;
        }

        let time = time.unwrap_or_else(|| {
            NaiveTime::from_hms_opt(DEFAULT_TIME.0, DEFAULT_TIME.1, 0).expect("valid time")
        });
        let date = date.unwrap_or_else(|| {
            // Time only: today if still ahead, otherwise tomorrow.
            if time > self.reference.time() {
                self.reference.date_naive()
            } else {
                self.reference.date_naive() + Duration::days(1)
            }
        });

        Some((resolve_local(tz, date.and_time(time)), spans))
    }

    /// Match «в пятницу»-style weekday references.
    fn find_weekday(&self, lower: &str) -> Option<(NaiveDate, (usize, usize))> {
        const STEMS: [(&str, u8); 7] = [
            ("понедельник", 0),
            ("вторник", 1),
            ("сред", 2),
            ("четверг", 3),
            ("пятниц", 4),
            ("суббот", 5),
            ("воскресень", 6),
        ];
        for (stem, target) in STEMS {
            let Some(pos) = lower.find(stem) else { continue };

            // Extend the span over the declension tail.
            let mut end = pos + stem.len();
            end += lower[end..]
                .chars()
                .take_while(|c| c.is_alphabetic())
                .map(|c| c.len_utf8())
                .sum::<usize>();
            // Swallow a leading «в »/«во ».
            let mut start = pos;
            for prefix in ["во ", "в "] {
                if lower[..pos].ends_with(prefix) {
                    start = pos - prefix.len();
                    break;
                }
            }

            let today = self.reference.date_naive();
            let current = today.weekday().num_days_from_monday() as u8;
            let mut ahead = (7 + target as i64 - current as i64) % 7;
            if ahead == 0 {
                ahead = 7;
            }
            return Some((today + Duration::days(ahead), (start, end)));
        }
        None
    }
}

fn overlaps(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|&(s, e)| start < e && end > s)
}

/// Lowercase `text`, recording for every byte offset of the result the byte
/// offset of the originating character in `text`. Lowercasing can change a
/// character's UTF-8 length (İ, ẞ), so byte spans found in the lowered
/// string are not valid indices into the original without this mapping.
fn lowercase_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut lower = String::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len() + 1);
    for (idx, ch) in text.char_indices() {
        let before = lower.len();
        for lc in ch.to_lowercase() {
            lower.push(lc);
        }
        offsets.extend(std::iter::repeat(idx).take(lower.len() - before));
    }
    offsets.push(text.len());
    (lower, offsets)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, Weekday};
    use chrono_tz::Europe::Moscow;

    fn parser() -> DateTextParser {
        // Thursday 2026-02-05, 12:00 Moscow.
        DateTextParser::with_reference(resolve_local(
            Moscow,
            NaiveDateTime::new(
                NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            ),
        ))
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        resolve_local(
            Moscow,
            NaiveDateTime::new(
                NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
                NaiveTime::from_hms_opt(h, mi, 0).unwrap(),
            ),
        )
    }

    #[test]
    fn test_parse_iso_datetime() {
        let dt = parser().parse_datetime("2026-03-15 09:00").unwrap();
        assert_eq!(dt, local(2026, 3, 15, 9, 0));
    }

    #[test]
    fn test_parse_dotted_date_defaults_time() {
        let dt = parser().parse_datetime("15.03.2026").unwrap();
        assert_eq!(dt, local(2026, 3, 15, 9, 0));
    }

    #[test]
    fn test_dotted_date_without_year_rolls_forward() {
        // 15.01 already passed relative to the 2026-02-05 reference.
        let dt = parser().parse_datetime("15.01 10:00").unwrap();
        assert_eq!(dt, local(2027, 1, 15, 10, 0));
    }

    #[test]
    fn test_parse_tomorrow_with_bare_hour() {
        let dt = parser().parse_datetime("завтра в 9").unwrap();
        assert_eq!(dt, local(2026, 2, 6, 9, 0));
    }

    #[test]
    fn test_parse_day_after_tomorrow() {
        let dt = parser().parse_datetime("послезавтра в 18:30").unwrap();
        assert_eq!(dt, local(2026, 2, 7, 18, 30));
    }

    #[test]
    fn test_parse_relative_minutes() {
        let dt = parser().parse_datetime("через 30 минут").unwrap();
        assert_eq!(dt, local(2026, 2, 5, 12, 30));
    }

    #[test]
    fn test_parse_weekday() {
        let dt = parser().parse_datetime("в пятницу в 15:00").unwrap();
        assert_eq!(dt.weekday(), Weekday::Fri);
        assert_eq!(dt, local(2026, 2, 6, 15, 0));
    }

    #[test]
    fn test_time_only_past_rolls_to_tomorrow() {
        // Reference is 12:00; 9:00 already passed today.
        let dt = parser().parse_datetime("в 9").unwrap();
        assert_eq!(dt, local(2026, 2, 6, 9, 0));
        let dt = parser().parse_datetime("в 15:00").unwrap();
        assert_eq!(dt, local(2026, 2, 5, 15, 0));
    }

    #[test]
    fn test_no_date_phrase() {
        assert!(parser().parse_datetime("купить молоко").is_none());
        assert!(parser().parse_datetime("").is_none());
    }

    #[test]
    fn test_extract_fast_path() {
        let m = parser().extract("завтра в 9 купить молоко").unwrap();
        assert_eq!(m.instant, local(2026, 2, 6, 9, 0));
        assert_eq!(m.title, "купить молоко");

        let m = parser().extract("Купить молоко 2026-03-15 09:00").unwrap();
        assert_eq!(m.instant, local(2026, 3, 15, 9, 0));
        assert_eq!(m.title, "Купить молоко");
    }

    #[test]
    fn test_extract_with_case_shifting_characters() {
        // İ lowers to two codepoints and ẞ lowers to a shorter one, so the
        // lowered string has different byte offsets than the original.
        let m = parser().extract("İstanbul завтра в 9 купить билеты").unwrap();
        assert_eq!(m.instant, local(2026, 2, 6, 9, 0));
        assert_eq!(m.title, "İstanbul купить билеты");

        let m = parser().extract("STRAẞE завтра в 9 проверить почту").unwrap();
        assert_eq!(m.title, "STRAẞE проверить почту");
    }

    #[test]
    fn test_extract_requires_residual_title() {
        assert!(parser().extract("завтра в 9").is_none());
        assert!(parser().extract("купить молоко").is_none());
    }
}
