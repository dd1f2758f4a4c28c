//! Reminder records and the payloads that mutate them.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceSpec;

// ============================================================================
// Reminder
// ============================================================================

/// Delivery lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Eligible for delivery when due.
    Active,
    /// Finished or switched off; the scheduler skips it.
    Disabled,
}

/// A scheduled notification for one user.
///
/// `trigger_at` is stored in UTC; `timezone` is kept alongside so recurrence
/// arithmetic steps through local wall-clock dates (a daily 09:00 reminder
/// stays at 09:00 across a DST transition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reminder {
    /// Unique id.
    pub id: String,
    /// Series this reminder was materialized from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Owning user.
    pub user_id: i64,
    /// Conversation to deliver into; `None` means delivery is impossible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Next delivery instant, UTC.
    pub trigger_at: DateTime<Utc>,
    /// Timezone recurrence arithmetic runs in.
    #[schemars(with = "String")]
    pub timezone: Tz,
    /// Message text.
    pub text: String,
    /// Whether the scheduler considers this reminder at all.
    pub enabled: bool,
    /// Lifecycle state.
    pub status: ReminderStatus,
    /// Recurrence; `None` is a one-shot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceSpec>,
    /// Local dates excluded from a recurring schedule («кроме 10.03»).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exdates: Vec<NaiveDate>,
    /// Last instant a delivery attempt concluded for this reminder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Set once for one-shots when they fire; recurring reminders clear it
    /// on every rollover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Set when the last conclusion was a missed write-off rather than a
    /// delivery; cleared again on the next successful delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// Create an enabled one-shot reminder.
    pub fn new(
        user_id: i64,
        chat_id: Option<i64>,
        text: impl Into<String>,
        trigger_at: DateTime<Utc>,
        timezone: Tz,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            event_id: None,
            user_id,
            chat_id,
            trigger_at,
            timezone,
            text: text.into(),
            enabled: true,
            status: ReminderStatus::Active,
            recurrence: None,
            exdates: Vec::new(),
            last_triggered_at: None,
            sent_at: None,
            missed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a recurrence rule.
    pub fn with_recurrence(mut self, spec: RecurrenceSpec) -> Self {
        self.recurrence = Some(spec);
        self
    }

    /// Exclude specific local dates from a recurring schedule.
    pub fn with_exdates(mut self, exdates: Vec<NaiveDate>) -> Self {
        self.exdates = exdates;
        self
    }

    /// Link to the series this reminder was materialized from.
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Whether the reminder is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.status == ReminderStatus::Active && self.trigger_at <= now
    }

    /// Mark finished: disabled, out of the scheduler's view.
    pub fn disable(&mut self, now: DateTime<Utc>) {
        self.enabled = false;
        self.status = ReminderStatus::Disabled;
        self.updated_at = now;
    }
}

// ============================================================================
// Mutation payloads and stats
// ============================================================================

/// A snooze request: push the next delivery out by a fixed number of minutes
/// from a stated base instant.
///
/// Carrying `base_trigger_at` makes the request idempotent: replaying the
/// same payload lands on the same result instead of compounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SnoozeRequest {
    pub reminder_id: String,
    pub minutes: i64,
    pub base_trigger_at: DateTime<Utc>,
}

impl SnoozeRequest {
    pub fn new(reminder_id: impl Into<String>, minutes: i64, base: DateTime<Utc>) -> Self {
        Self {
            reminder_id: reminder_id.into(),
            minutes,
            base_trigger_at: base,
        }
    }
}

/// Store-level counters, for diagnostics and the status surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReminderStats {
    pub total: usize,
    pub enabled: usize,
    pub recurring: usize,
}

// ============================================================================
// Tests
// ============================================================================
