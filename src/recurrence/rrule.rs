//! RRULE-like string codec for persisted recurrences.
//!
//! The on-disk form is a semicolon-joined `KEY=VALUE` list over
//! `FREQ`, `BYDAY`, `BYMONTHDAY`, `INTERVAL`, `COUNT` and `UNTIL`
//! (`UNTIL` in UTC `YYYYMMDDTHHMMSSZ`). Encoding is canonical — fixed key
//! order, `INTERVAL` omitted when 1 — so parse → mutate → serialize
//! round-trips losslessly.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{RecurrenceError, Result};

use super::spec::{Frequency, RecurrenceSpec};

const UNTIL_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const BYDAY_CODES: [&str; 7] = ["MO", "TU", "WE", "TH", "FR", "SA", "SU"];
const WEEKDAYS_BYDAY: [u8; 5] = [0, 1, 2, 3, 4];

/// Encode a recurrence spec into its RRULE string form.
pub fn encode(spec: &RecurrenceSpec) -> String {
    let mut parts = Vec::new();

    let (freq, byday): (&str, Vec<u8>) = match spec.freq {
        Frequency::Daily => ("DAILY", Vec::new()),
        Frequency::Weekly => ("WEEKLY", spec.by_weekday.clone()),
        Frequency::Weekdays => ("WEEKLY", WEEKDAYS_BYDAY.to_vec()),
        Frequency::Monthly => ("MONTHLY", Vec::new()),
    };
    parts.push(format!("FREQ={freq}"));

    if !byday.is_empty() {
        let codes: Vec<&str> = byday
            .iter()
            .filter(|&&d| d <= 6)
            .map(|&d| BYDAY_CODES[d as usize])
            .collect();
        parts.push(format!("BYDAY={}", codes.join(",")));
    }
    if let Some(day) = spec.by_monthday {
        parts.push(format!("BYMONTHDAY={day}"));
    }
    if spec.interval > 1 {
        parts.push(format!("INTERVAL={}", spec.interval));
    }
    if let Some(count) = spec.count {
        parts.push(format!("COUNT={count}"));
    }
    if let Some(until) = spec.until {
        parts.push(format!("UNTIL={}", until.format(UNTIL_FORMAT)));
    }

    parts.join(";")
}

/// Decode an RRULE string back into a recurrence spec.
pub fn decode(rrule: &str) -> Result<RecurrenceSpec> {
    let mut freq: Option<&str> = None;
    let mut byday: Vec<u8> = Vec::new();
    let mut by_monthday: Option<u32> = None;
    let mut interval: u32 = 1;
    let mut count: Option<u32> = None;
    let mut until: Option<DateTime<Utc>> = None;

    for pair in rrule.split(';').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| RecurrenceError::Rrule(format!("missing '=' in `{pair}`")))?;
        match key {
            "FREQ" => freq = Some(value),
            "BYDAY" => {
                for code in value.split(',') {
                    let day = BYDAY_CODES
                        .iter()
                        .position(|&c| c == code)
                        .ok_or_else(|| {
                            RecurrenceError::Rrule(format!("unknown BYDAY code `{code}`"))
                        })?;
                    byday.push(day as u8);
                }
            }
            "BYMONTHDAY" => {
                let day: u32 = value
                    .parse()
                    .map_err(|_| RecurrenceError::Rrule(format!("bad BYMONTHDAY `{value}`")))?;
                if !(1..=31).contains(&day) {
                    return Err(RecurrenceError::MonthdayOutOfRange(day).into());
                }
                by_monthday = Some(day);
            }
            "INTERVAL" => {
                interval = value
                    .parse()
                    .map_err(|_| RecurrenceError::Rrule(format!("bad INTERVAL `{value}`")))?;
                if interval < 1 {
                    return Err(RecurrenceError::IntervalOutOfRange(interval).into());
                }
            }
            "COUNT" => {
                count = Some(
                    value
                        .parse()
                        .map_err(|_| RecurrenceError::Rrule(format!("bad COUNT `{value}`")))?,
                );
            }
            "UNTIL" => {
                let naive = NaiveDateTime::parse_from_str(value, UNTIL_FORMAT)
                    .map_err(|_| RecurrenceError::Rrule(format!("bad UNTIL `{value}`")))?;
                until = Some(Utc.from_utc_datetime(&naive));
            }
            other => {
                return Err(RecurrenceError::Rrule(format!("unknown key `{other}`")).into());
            }
        }
    }

    byday.sort_unstable();
    byday.dedup();

    let freq = match freq {
        Some("DAILY") => Frequency::Daily,
        Some("MONTHLY") => Frequency::Monthly,
        Some("WEEKLY") => {
            if byday == WEEKDAYS_BYDAY {
                Frequency::Weekdays
            } else {
                Frequency::Weekly
            }
        }
        Some(other) => {
            return Err(RecurrenceError::Rrule(format!("unknown FREQ `{other}`")).into());
        }
        None => return Err(RecurrenceError::Rrule("missing FREQ".to_string()).into()),
    };

    let spec = RecurrenceSpec {
        freq,
        interval,
        by_weekday: if freq == Frequency::Weekly { byday } else { Vec::new() },
        by_monthday,
        count,
        until,
    };
    spec.validate()?;
    Ok(spec)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_basic() {
        assert_eq!(encode(&RecurrenceSpec::daily()), "FREQ=DAILY");
        assert_eq!(
            encode(&RecurrenceSpec::weekly_on([0, 2]).every(2)),
            "FREQ=WEEKLY;BYDAY=MO,WE;INTERVAL=2"
        );
        assert_eq!(
            encode(&RecurrenceSpec::weekdays()),
            "FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR"
        );
        assert_eq!(
            encode(&RecurrenceSpec::monthly_on(15)),
            "FREQ=MONTHLY;BYMONTHDAY=15"
        );
    }

    #[test]
    fn test_until_round_trip() {
        let until = Utc.with_ymd_and_hms(2026, 3, 1, 20, 59, 59).unwrap();
        let spec = RecurrenceSpec::daily().until(until);
        let encoded = encode(&spec);
        assert_eq!(encoded, "FREQ=DAILY;UNTIL=20260301T205959Z");
        assert_eq!(decode(&encoded).unwrap(), spec);
    }

    #[test]
    fn test_string_round_trip_is_stable() {
        for rrule in [
            "FREQ=DAILY",
            "FREQ=DAILY;INTERVAL=3",
            "FREQ=WEEKLY;BYDAY=WE;INTERVAL=2",
            "FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR",
            "FREQ=MONTHLY;BYMONTHDAY=31;COUNT=6",
            "FREQ=WEEKLY;BYDAY=SA,SU;UNTIL=20261231T235959Z",
        ] {
            let spec = decode(rrule).unwrap();
            assert_eq!(encode(&spec), rrule, "round trip changed `{rrule}`");
        }
    }

    #[test]
    fn test_full_weekday_set_decodes_as_weekdays() {
        let spec = decode("FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR").unwrap();
        assert_eq!(spec.freq, Frequency::Weekdays);
        assert!(spec.by_weekday.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("FREQ=HOURLY").is_err());
        assert!(decode("BYDAY=MO").is_err()); // missing FREQ
        assert!(decode("FREQ=WEEKLY;BYDAY=XX").is_err());
        assert!(decode("FREQ=MONTHLY;BYMONTHDAY=42").is_err());
        assert!(decode("FREQ=DAILY;UNTIL=tomorrow").is_err());
        assert!(decode("garbage").is_err());
    }
}
