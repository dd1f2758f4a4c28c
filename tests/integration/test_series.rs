//! Series split semantics and wire-format stability.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Europe::Moscow;

use carillon::recurrence::{rrule, OccurrencePatch, RecurrenceSeries, RecurrenceSpec, SeriesPatch};

fn morning(day: u32) -> DateTime<Utc> {
    Moscow
        .with_ymd_and_hms(2026, 3, day, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn busy_series() -> RecurrenceSeries {
    let mut series =
        RecurrenceSeries::new("Планёрка", morning(2), Moscow).with_rrule("FREQ=DAILY;COUNT=60");
    for day in [3, 7, 12, 18, 25] {
        series.exdates.insert(morning(day));
    }
    for (day, title) in [(5, "Ретро"), (20, "Демо")] {
        let key = series.instant_key(morning(day));
        series.overrides.insert(
            key,
            OccurrencePatch {
                title: Some(title.to_string()),
                start_at: None,
            },
        );
    }
    series
}

#[test]
fn test_split_at_every_pivot_partitions_exceptions() {
    let series = busy_series();
    for pivot_day in [1, 4, 10, 15, 19, 26, 31] {
        let pivot = morning(pivot_day);
        let (master, future) = series
            .edit_series_future(pivot, &SeriesPatch::default())
            .unwrap();

        // Every exception lands on exactly one side, chosen by the pivot.
        let merged: BTreeSet<_> = master.exdates.union(&future.exdates).copied().collect();
        assert_eq!(merged, series.exdates, "pivot day {pivot_day}");
        assert!(master.exdates.iter().all(|&d| d < pivot));
        assert!(future.exdates.iter().all(|&d| d >= pivot));
        assert_eq!(
            master.overrides.len() + future.overrides.len(),
            series.overrides.len(),
            "pivot day {pivot_day}"
        );
    }
}

#[test]
fn test_split_then_delete_instance_on_both_halves() {
    let series = busy_series();
    let pivot = morning(15);
    let (master, future) = series
        .edit_series_future(
            pivot,
            &SeriesPatch {
                title: Some("Планёрка (новый формат)".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    // Each half accepts further single-occurrence edits independently.
    let master = master.delete_instance_this(morning(10));
    let future = future.delete_instance_this(morning(22));
    assert!(master.exdates.contains(&morning(10)));
    assert!(future.exdates.contains(&morning(22)));
    assert!(!master.exdates.contains(&morning(22)));

    // The master's rule closes before the pivot.
    let until = pivot - Duration::seconds(1);
    let expected = format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ"));
    assert!(master.rrule.unwrap().contains(&expected));
    assert_eq!(future.rrule.as_deref(), Some("FREQ=DAILY"));
}

#[test]
fn test_wire_form_round_trips_byte_stable() {
    let specs = [
        RecurrenceSpec::daily(),
        RecurrenceSpec::daily().every(3).times(10),
        RecurrenceSpec::weekdays(),
        RecurrenceSpec::weekly_on([0, 2, 4]).every(2),
        RecurrenceSpec::monthly_on(15)
            .until(Utc.with_ymd_and_hms(2026, 12, 31, 21, 0, 0).unwrap()),
    ];

    for spec in specs {
        let encoded = rrule::encode(&spec);
        let decoded = rrule::decode(&encoded).unwrap();
        assert_eq!(decoded, spec, "wire form {encoded}");
        // Re-encoding is byte-identical; stored strings never drift.
        assert_eq!(rrule::encode(&decoded), encoded);
    }
}

#[test]
fn test_weekday_shorthand_survives_the_wire() {
    // The weekday shorthand and an explicit MO-FR set are the same rule;
    // both decode to the shorthand and re-encode identically.
    let encoded = rrule::encode(&RecurrenceSpec::weekdays());
    assert_eq!(encoded, "FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR");
    let explicit = rrule::decode("FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR").unwrap();
    assert_eq!(explicit, RecurrenceSpec::weekdays());
    assert_eq!(rrule::encode(&explicit), encoded);
}
