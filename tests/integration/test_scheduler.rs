//! Scheduler scenarios across several ticks.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Europe::Moscow;

use carillon::error::{DeliveryError, Result};
use carillon::recurrence::RecurrenceSpec;
use carillon::reminder::{
    MemoryReminderStore, Notifier, Reminder, ReminderStore, Scheduler,
};

struct CollectingNotifier {
    delivered: Mutex<Vec<(String, DateTime<Utc>)>>,
    failures_left: Mutex<u32>,
}

impl CollectingNotifier {
    fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures_left: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn deliver(&self, reminder: &Reminder) -> Result<()> {
        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DeliveryError::Unreachable("flaky transport".to_string()).into());
        }
        self.delivered
            .lock()
            .unwrap()
            .push((reminder.id.clone(), reminder.trigger_at));
        Ok(())
    }
}

fn scheduler(
    store: Arc<MemoryReminderStore>,
    notifier: Arc<CollectingNotifier>,
) -> Scheduler<MemoryReminderStore, CollectingNotifier> {
    Scheduler::new(
        store,
        notifier,
        StdDuration::from_secs(30),
        Duration::minutes(60),
    )
}

#[tokio::test]
async fn test_recurring_reminder_over_three_days() {
    let store = Arc::new(MemoryReminderStore::new());
    let notifier = Arc::new(CollectingNotifier::new());
    // Daily at 09:00 Moscow for 3 occurrences.
    let first = Moscow
        .with_ymd_and_hms(2026, 2, 5, 9, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let reminder = Reminder::new(1, Some(10), "Зарядка", first, Moscow)
        .with_recurrence(RecurrenceSpec::daily().times(3));
    let id = store.create(reminder).await.unwrap().id;

    let sched = scheduler(store.clone(), notifier.clone());
    for day in 5..=8 {
        let now = Moscow
            .with_ymd_and_hms(2026, 2, day, 9, 5, 0)
            .unwrap()
            .with_timezone(&Utc);
        sched.tick(now).await.unwrap();
    }

    // Exactly three deliveries, one per morning, then the rule ran out.
    let delivered = notifier.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 3);
    for (i, (_, trigger)) in delivered.iter().enumerate() {
        assert_eq!(
            trigger.with_timezone(&Moscow),
            Moscow
                .with_ymd_and_hms(2026, 2, 5 + i as u32, 9, 0, 0)
                .unwrap()
        );
    }
    assert!(!store.get(&id).await.unwrap().enabled);
}

#[tokio::test]
async fn test_flaky_transport_retries_within_grace() {
    let store = Arc::new(MemoryReminderStore::new());
    let notifier = Arc::new(CollectingNotifier::new());
    let trigger = Utc.with_ymd_and_hms(2026, 3, 15, 6, 0, 0).unwrap();
    store
        .create(Reminder::new(1, Some(10), "Письмо", trigger, Moscow))
        .await
        .unwrap();

    // Two transient failures, then the transport recovers.
    *notifier.failures_left.lock().unwrap() = 2;
    let sched = scheduler(store.clone(), notifier.clone());
    for minute in 1..=3 {
        sched.tick(trigger + Duration::minutes(minute)).await.unwrap();
    }

    assert_eq!(notifier.delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_outage_past_grace_rolls_recurring_forward_once() {
    let store = Arc::new(MemoryReminderStore::new());
    let notifier = Arc::new(CollectingNotifier::new());
    let first = Moscow
        .with_ymd_and_hms(2026, 2, 5, 9, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let reminder = Reminder::new(1, Some(10), "Таблетки", first, Moscow)
        .with_recurrence(RecurrenceSpec::daily());
    let id = store.create(reminder).await.unwrap().id;

    // The process comes back three days later: no stale burst, a single
    // write-off, and the trigger lands on the next future morning.
    let back_up = Moscow
        .with_ymd_and_hms(2026, 2, 8, 7, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let sched = scheduler(store.clone(), notifier.clone());
    let report = sched.tick(back_up).await.unwrap();
    assert_eq!(report.missed, 1);
    assert!(notifier.delivered.lock().unwrap().is_empty());

    let rolled = store.get(&id).await.unwrap();
    assert_eq!(
        rolled.trigger_at.with_timezone(&Moscow),
        Moscow.with_ymd_and_hms(2026, 2, 8, 9, 0, 0).unwrap()
    );

    // The surviving occurrence is delivered normally when it comes due.
    let report = sched
        .tick(rolled.trigger_at + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_snoozed_reminder_fires_at_the_new_time() {
    let store = Arc::new(MemoryReminderStore::new());
    let notifier = Arc::new(CollectingNotifier::new());
    let trigger = Utc.with_ymd_and_hms(2026, 3, 15, 6, 0, 0).unwrap();
    let id = store
        .create(Reminder::new(1, Some(10), "Звонок", trigger, Moscow))
        .await
        .unwrap()
        .id;

    store
        .apply_snooze(&carillon::reminder::SnoozeRequest::new(&id, 15, trigger))
        .await
        .unwrap();

    let sched = scheduler(store.clone(), notifier.clone());
    let report = sched.tick(trigger + Duration::minutes(10)).await.unwrap();
    assert_eq!(report, Default::default());

    let report = sched.tick(trigger + Duration::minutes(16)).await.unwrap();
    assert_eq!(report.delivered, 1);
}
