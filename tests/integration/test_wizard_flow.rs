//! End-to-end wizard flows backed by a real reminder store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::Moscow;
use chrono_tz::Tz;

use carillon::error::Result;
use carillon::recurrence::RecurrenceSpec;
use carillon::reminder::{MemoryReminderStore, Reminder, ReminderStore};
use carillon::wizard::{
    ActionPayload, MemorySessionStore, SessionStore, WizardBackend, WizardEngine, WizardReply,
    WizardStep,
};

/// Backend that writes confirmed wizards into a reminder store.
struct StoreBackend {
    reminders: Arc<MemoryReminderStore>,
}

#[async_trait]
impl WizardBackend for StoreBackend {
    async fn create_reminder(
        &self,
        user_id: i64,
        chat_id: i64,
        title: &str,
        trigger_at: DateTime<Tz>,
        recurrence: Option<RecurrenceSpec>,
        exdates: &[NaiveDate],
    ) -> Result<String> {
        let mut reminder = Reminder::new(
            user_id,
            Some(chat_id),
            title,
            trigger_at.with_timezone(&Utc),
            trigger_at.timezone(),
        );
        if let Some(spec) = recurrence {
            reminder = reminder.with_recurrence(spec);
        }
        if !exdates.is_empty() {
            reminder = reminder.with_exdates(exdates.to_vec());
        }
        let created = self.reminders.create(reminder).await?;
        Ok(created.id)
    }

    async fn create_event(
        &self,
        _user_id: i64,
        _chat_id: i64,
        _title: &str,
        _start_at: DateTime<Tz>,
    ) -> Result<String> {
        Ok("event".to_string())
    }

    async fn reschedule_reminder(
        &self,
        _user_id: i64,
        reminder_id: &str,
        new_trigger_at: DateTime<Tz>,
    ) -> Result<()> {
        self.reminders
            .update_trigger(reminder_id, new_trigger_at.with_timezone(&Utc))
            .await?;
        Ok(())
    }

    async fn set_profile_timezone(&self, _user_id: i64, _timezone: Tz) -> Result<()> {
        Ok(())
    }
}

fn setup() -> (
    WizardEngine<MemorySessionStore, StoreBackend>,
    Arc<MemorySessionStore>,
    Arc<MemoryReminderStore>,
) {
    let sessions = Arc::new(MemorySessionStore::new(chrono::Duration::minutes(15)));
    let reminders = Arc::new(MemoryReminderStore::new());
    let backend = Arc::new(StoreBackend {
        reminders: reminders.clone(),
    });
    (
        WizardEngine::new(sessions.clone(), backend, Moscow),
        sessions,
        reminders,
    )
}

fn start() -> ActionPayload {
    ActionPayload {
        op: "wizard_start".to_string(),
        wizard_id: Some("reminder_create".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_flow_creates_exactly_one_reminder() {
    let (engine, sessions, reminders) = setup();

    engine.handle_action(1, 10, &start()).await.unwrap();
    engine.handle_text(1, 10, "Купить молоко").await.unwrap();
    engine
        .handle_text(1, 10, "2026-03-15 09:00")
        .await
        .unwrap();
    let reply = engine.handle_text(1, 10, "нет").await.unwrap().unwrap();
    assert!(matches!(
        reply,
        WizardReply::Prompt {
            step: WizardStep::Confirm,
            ..
        }
    ));

    let reply = engine
        .handle_action(1, 10, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();
    assert!(matches!(reply, WizardReply::Done { .. }));

    // Exactly one reminder landed in the store, with the collected fields.
    let stored = reminders.list_for_user(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "Купить молоко");
    assert_eq!(
        stored[0].trigger_at.with_timezone(&Moscow),
        Moscow.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap()
    );
    assert!(stored[0].recurrence.is_none());

    // The session is gone; a stray confirm cannot duplicate.
    let (session, expired) = sessions.load(1, 10).await.unwrap();
    assert!(session.is_none());
    assert!(!expired);
    let retry = engine
        .handle_action(1, 10, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();
    assert!(matches!(retry, WizardReply::Refusal { .. }));
    assert_eq!(reminders.list_for_user(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recurring_flow_stores_the_parsed_rule() {
    let (engine, _sessions, reminders) = setup();

    engine.handle_action(1, 10, &start()).await.unwrap();
    engine.handle_text(1, 10, "Полить цветы").await.unwrap();
    engine
        .handle_text(1, 10, "2026-03-15 09:00")
        .await
        .unwrap();
    engine
        .handle_text(1, 10, "каждые 2 недели по средам")
        .await
        .unwrap();
    engine
        .handle_action(1, 10, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();

    let stored = reminders.list_for_user(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    let spec = stored[0].recurrence.as_ref().unwrap();
    assert_eq!(spec.interval, 2);
    assert_eq!(spec.by_weekday, vec![2]);
    assert_eq!(spec.label(), "каждые 2 недели по средам");
}

#[tokio::test]
async fn test_excluded_dates_land_on_the_stored_reminder() {
    let (engine, _sessions, reminders) = setup();

    engine.handle_action(1, 10, &start()).await.unwrap();
    engine.handle_text(1, 10, "Зарядка").await.unwrap();
    engine
        .handle_text(1, 10, "2026-03-01 09:00")
        .await
        .unwrap();
    engine
        .handle_text(1, 10, "каждый день кроме 10.03.2026")
        .await
        .unwrap();
    engine
        .handle_action(1, 10, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();

    let stored = reminders.list_for_user(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].exdates,
        vec![NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()]
    );

    // The excluded day is skipped when the schedule rolls over it.
    let concluded = reminders
        .mark_sent(
            &stored[0].id,
            Utc.with_ymd_and_hms(2026, 3, 9, 6, 1, 0).unwrap(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(
        concluded.trigger_at.with_timezone(&Moscow),
        Moscow.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_cancel_leaves_no_trace() {
    let (engine, sessions, reminders) = setup();

    engine.handle_action(1, 10, &start()).await.unwrap();
    engine.handle_text(1, 10, "Черновик").await.unwrap();
    let reply = engine
        .handle_action(1, 10, &ActionPayload::op("wizard_cancel"))
        .await
        .unwrap();
    assert!(matches!(reply, WizardReply::Done { .. }));

    let (session, _) = sessions.load(1, 10).await.unwrap();
    assert!(session.is_none());
    assert!(reminders.list_for_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_two_chats_run_independent_wizards() {
    let (engine, _sessions, reminders) = setup();

    engine.handle_action(1, 10, &start()).await.unwrap();
    engine.handle_action(1, 20, &start()).await.unwrap();

    engine.handle_text(1, 10, "Молоко").await.unwrap();
    engine.handle_text(1, 20, "Хлеб").await.unwrap();
    engine
        .handle_text(1, 10, "2026-03-15 09:00")
        .await
        .unwrap();
    engine
        .handle_text(1, 20, "2026-03-16 10:00")
        .await
        .unwrap();
    engine.handle_text(1, 10, "нет").await.unwrap();
    engine.handle_text(1, 20, "нет").await.unwrap();

    engine
        .handle_action(1, 10, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();
    engine
        .handle_action(1, 20, &ActionPayload::op("wizard_confirm"))
        .await
        .unwrap();

    let mut texts: Vec<String> = reminders
        .list_for_user(1)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.text)
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["Молоко".to_string(), "Хлеб".to_string()]);
}
