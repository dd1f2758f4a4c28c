//! The persisted state of one in-progress wizard.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{WizardKind, WizardStep};

/// One in-progress guided dialog for a `(user, conversation)` pair.
///
/// The session store exclusively owns the lifetime: created on wizard
/// start, rewritten on each valid input, destroyed on cancel, confirm or
/// TTL expiry. The serialized form is the interchange record
/// `{wizard_id, step, data, started_at, updated_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardSession {
    /// The wizard kind.
    #[serde(rename = "wizard_id")]
    pub kind: WizardKind,
    /// The current step.
    pub step: WizardStep,
    /// Partially-collected fields, in stable sorted key order.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// When the wizard was started.
    pub started_at: DateTime<Utc>,
    /// Last mutation time; expiry is measured from here.
    pub updated_at: DateTime<Utc>,
}

impl WizardSession {
    /// Start a fresh session at the kind's first step.
    pub fn new(kind: WizardKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            step: kind.first_step(),
            data: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Record a collected field.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Read a collected string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Move to `step`, stamping the mutation time.
    pub fn advance(&mut self, step: WizardStep, now: DateTime<Utc>) {
        self.step = step;
        self.updated_at = now;
    }

    /// Go back one step, pruning fields of both the step being left and the
    /// step being returned to, so neither stale future-step data nor a
    /// half-answered target survives.
    pub fn back(&mut self, now: DateTime<Utc>) -> Option<WizardStep> {
        let prev = self.kind.prev_step(self.step)?;
        for field in self.step.fields().iter().chain(prev.fields()) {
            self.data.remove(*field);
        }
        self.step = prev;
        self.updated_at = now;
        Some(prev)
    }

    /// Whether all fields required for Confirm are present.
    pub fn is_complete(&self) -> bool {
        self.kind
            .required_fields()
            .iter()
            .all(|f| self.data.contains_key(*f))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_prunes_fields() {
        let now = Utc::now();
        let mut session = WizardSession::new(WizardKind::ReminderCreate, now);
        session.set("title", "Купить молоко");
        session.advance(WizardStep::AwaitDatetime, now);
        session.set("trigger_at", "2026-03-15T09:00:00+03:00");
        session.advance(WizardStep::AwaitRecurrence, now);
        session.set("recurrence", "daily");
        session.advance(WizardStep::Confirm, now);

        // Back from Confirm lands on AwaitRecurrence with its field pruned.
        assert_eq!(session.back(now), Some(WizardStep::AwaitRecurrence));
        assert!(!session.data.contains_key("recurrence"));
        assert!(session.data.contains_key("trigger_at"));

        // All the way back to the first step: only fields valid there remain.
        assert_eq!(session.back(now), Some(WizardStep::AwaitDatetime));
        assert!(!session.data.contains_key("trigger_at"));
        assert_eq!(session.back(now), Some(WizardStep::AwaitTitle));
        assert!(session.data.is_empty());
        assert_eq!(session.back(now), None);
    }

    #[test]
    fn test_record_shape() {
        let now = Utc::now();
        let mut session = WizardSession::new(WizardKind::ReminderCreate, now);
        session.set("title", "Тест");
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["wizard_id"], "reminder_create");
        assert_eq!(json["step"], "await_title");
        assert_eq!(json["data"]["title"], "Тест");
        assert!(json["started_at"].is_string());

        let restored: WizardSession = serde_json::from_value(json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_completeness() {
        let now = Utc::now();
        let mut session = WizardSession::new(WizardKind::ReminderCreate, now);
        assert!(!session.is_complete());
        session.set("title", "Тест");
        session.set("trigger_at", "2026-03-15T09:00:00+03:00");
        assert!(session.is_complete());
    }
}
