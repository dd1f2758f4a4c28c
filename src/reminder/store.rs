//! Reminder persistence and the delivery-completion state machine.
//!
//! `mark_sent` owns the rollover rules: a one-shot is finished the moment a
//! delivery attempt concludes, while a recurring reminder advances to its
//! next occurrence strictly after the old trigger, skipping any occurrences
//! the downtime swallowed. Occurrence counts are consumed by fired and
//! skipped occurrences alike, so a "5 times" reminder never fires a sixth.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

use super::types::{Reminder, ReminderStats, ReminderStatus, SnoozeRequest};

// ============================================================================
// Store trait
// ============================================================================

/// Trait for reminder storage backends.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Insert a new reminder.
    async fn create(&self, reminder: Reminder) -> Result<Reminder>;

    /// Fetch by id.
    async fn get(&self, id: &str) -> Result<Reminder>;

    /// All reminders owned by a user, soonest trigger first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Reminder>>;

    /// All enabled reminders, soonest trigger first.
    async fn list_enabled(&self) -> Result<Vec<Reminder>>;

    /// Enabled, active reminders whose trigger is at or before `now`.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>>;

    /// Conclude a delivery attempt and advance or finish the reminder.
    /// `missed` records whether the occurrence was written off instead of
    /// delivered.
    async fn mark_sent(&self, id: &str, now: DateTime<Utc>, missed: bool) -> Result<Reminder>;

    /// Push the trigger to `base_trigger_at + minutes`.
    async fn apply_snooze(&self, req: &SnoozeRequest) -> Result<Reminder>;

    /// Move the trigger outright; re-enables the reminder.
    async fn update_trigger(&self, id: &str, new_trigger_at: DateTime<Utc>) -> Result<Reminder>;

    /// Switch a reminder off without deleting it.
    async fn disable(&self, id: &str) -> Result<Reminder>;

    /// Delete a reminder the user owns.
    async fn delete(&self, user_id: i64, id: &str) -> Result<()>;

    /// Store-level counters.
    async fn stats(&self) -> Result<ReminderStats>;
}

// ============================================================================
// Rollover
// ============================================================================

/// Advance `reminder` past a concluded delivery at `now`.
///
/// The concluded occurrence consumes one count; so does every further
/// occurrence that is already in the past. The next trigger is the first
/// occurrence strictly after both the old trigger and `now`, resolved
/// through the reminder's timezone. A reminder whose rule runs out (count
/// exhausted or UNTIL passed) is finished like a one-shot. Excluded dates
/// are stepped over without consuming a count.
fn conclude_delivery(reminder: &mut Reminder, now: DateTime<Utc>, missed: bool) {
    reminder.last_triggered_at = Some(now);
    reminder.missed_at = if missed { Some(now) } else { None };

    let Some(spec) = reminder.recurrence.clone() else {
        reminder.sent_at = Some(now);
        reminder.disable(now);
        return;
    };

    let tz = reminder.timezone;
    let anchor = reminder.trigger_at.with_timezone(&tz);
    let mut remaining = spec.count;

    // The occurrence that just fired.
    if consume(&mut remaining) {
        finish(reminder, now);
        return;
    }

    let mut cursor = anchor;
    let next = loop {
        match spec.next_occurrence(cursor, anchor) {
            None => {
                finish(reminder, now);
                return;
            }
            Some(candidate) => {
                if reminder.exdates.contains(&candidate.date_naive()) {
                    // An excluded date is not an occurrence.
                    cursor = candidate;
                    continue;
                }
                let utc = candidate.with_timezone(&Utc);
                if utc > now {
                    break utc;
                }
                // Swallowed by downtime; it still counts.
                debug!(
                    "Reminder {} skipping missed occurrence at {}",
                    reminder.id, utc
                );
                if consume(&mut remaining) {
                    finish(reminder, now);
                    return;
                }
                cursor = candidate;
            }
        }
    };

    let mut spec = spec;
    spec.count = remaining;
    reminder.recurrence = Some(spec);
    reminder.trigger_at = next;
    reminder.sent_at = None;
    reminder.updated_at = now;
}

/// Decrement a remaining-occurrence budget; true when it just ran out.
fn consume(remaining: &mut Option<u32>) -> bool {
    match remaining {
        Some(n) => {
            *n = n.saturating_sub(1);
            *n == 0
        }
        None => false,
    }
}

fn finish(reminder: &mut Reminder, now: DateTime<Utc>) {
    reminder.sent_at = Some(now);
    reminder.disable(now);
}

// ============================================================================
// Shared map logic
// ============================================================================

/// Map-level operations shared by the in-memory and file-backed stores.
struct ReminderMap;

impl ReminderMap {
    fn get(map: &HashMap<String, Reminder>, id: &str) -> Result<Reminder> {
        map.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    fn sorted(mut reminders: Vec<Reminder>) -> Vec<Reminder> {
        reminders.sort_by_key(|r| r.trigger_at);
        reminders
    }

    fn list_for_user(map: &HashMap<String, Reminder>, user_id: i64) -> Vec<Reminder> {
        Self::sorted(
            map.values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect(),
        )
    }

    fn list_enabled(map: &HashMap<String, Reminder>) -> Vec<Reminder> {
        Self::sorted(map.values().filter(|r| r.enabled).cloned().collect())
    }

    fn list_due(map: &HashMap<String, Reminder>, now: DateTime<Utc>) -> Vec<Reminder> {
        Self::sorted(map.values().filter(|r| r.is_due(now)).cloned().collect())
    }

    fn mark_sent(
        map: &mut HashMap<String, Reminder>,
        id: &str,
        now: DateTime<Utc>,
        missed: bool,
    ) -> Result<Reminder> {
        let reminder = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        conclude_delivery(reminder, now, missed);
        Ok(reminder.clone())
    }

    fn apply_snooze(map: &mut HashMap<String, Reminder>, req: &SnoozeRequest) -> Result<Reminder> {
        let reminder = map
            .get_mut(&req.reminder_id)
            .ok_or_else(|| StoreError::NotFound(req.reminder_id.clone()))?;
        reminder.trigger_at = req.base_trigger_at + Duration::minutes(req.minutes);
        reminder.enabled = true;
        reminder.status = ReminderStatus::Active;
        reminder.sent_at = None;
        reminder.updated_at = Utc::now();
        Ok(reminder.clone())
    }

    fn update_trigger(
        map: &mut HashMap<String, Reminder>,
        id: &str,
        new_trigger_at: DateTime<Utc>,
    ) -> Result<Reminder> {
        let reminder = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        reminder.trigger_at = new_trigger_at;
        reminder.enabled = true;
        reminder.status = ReminderStatus::Active;
        reminder.sent_at = None;
        reminder.updated_at = Utc::now();
        Ok(reminder.clone())
    }

    fn disable(map: &mut HashMap<String, Reminder>, id: &str) -> Result<Reminder> {
        let reminder = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        reminder.disable(Utc::now());
        Ok(reminder.clone())
    }

    fn delete(map: &mut HashMap<String, Reminder>, user_id: i64, id: &str) -> Result<()> {
        let reminder = map
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if reminder.user_id != user_id {
            return Err(StoreError::WrongOwner {
                id: id.to_string(),
                user_id,
            }
            .into());
        }
        map.remove(id);
        Ok(())
    }

    fn stats(map: &HashMap<String, Reminder>) -> ReminderStats {
        ReminderStats {
            total: map.len(),
            enabled: map.values().filter(|r| r.enabled).count(),
            recurring: map.values().filter(|r| r.recurrence.is_some()).count(),
        }
    }

    fn validate(reminder: &Reminder) -> Result<()> {
        if let Some(spec) = &reminder.recurrence {
            spec.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory reminder store for tests and embedded use.
pub struct MemoryReminderStore {
    reminders: RwLock<HashMap<String, Reminder>>,
}

impl MemoryReminderStore {
    pub fn new() -> Self {
        Self {
            reminders: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryReminderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn create(&self, reminder: Reminder) -> Result<Reminder> {
        ReminderMap::validate(&reminder)?;
        self.reminders
            .write()
            .await
            .insert(reminder.id.clone(), reminder.clone());
        Ok(reminder)
    }

    async fn get(&self, id: &str) -> Result<Reminder> {
        ReminderMap::get(&*self.reminders.read().await, id)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_for_user(
            &*self.reminders.read().await,
            user_id,
        ))
    }

    async fn list_enabled(&self) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_enabled(&*self.reminders.read().await))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_due(&*self.reminders.read().await, now))
    }

    async fn mark_sent(&self, id: &str, now: DateTime<Utc>, missed: bool) -> Result<Reminder> {
        ReminderMap::mark_sent(&mut *self.reminders.write().await, id, now, missed)
    }

    async fn apply_snooze(&self, req: &SnoozeRequest) -> Result<Reminder> {
        ReminderMap::apply_snooze(&mut *self.reminders.write().await, req)
    }

    async fn update_trigger(&self, id: &str, new_trigger_at: DateTime<Utc>) -> Result<Reminder> {
        ReminderMap::update_trigger(&mut *self.reminders.write().await, id, new_trigger_at)
    }

    async fn disable(&self, id: &str) -> Result<Reminder> {
        ReminderMap::disable(&mut *self.reminders.write().await, id)
    }

    async fn delete(&self, user_id: i64, id: &str) -> Result<()> {
        ReminderMap::delete(&mut *self.reminders.write().await, user_id, id)
    }

    async fn stats(&self) -> Result<ReminderStats> {
        Ok(ReminderMap::stats(&*self.reminders.read().await))
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// Reminders persisted as one JSON document, rewritten on every mutation.
///
/// Writes go to a `.tmp` sibling and are atomically renamed into place. A
/// corrupt document is logged and treated as empty rather than wedging the
/// whole engine at startup.
pub struct FileReminderStore {
    path: PathBuf,
    reminders: RwLock<HashMap<String, Reminder>>,
}

impl FileReminderStore {
    /// Open (creating if needed) the reminder document at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let reminders = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<Reminder>>(&content) {
                Ok(list) => list.into_iter().map(|r| (r.id.clone(), r)).collect(),
                Err(e) => {
                    warn!(
                        "Reminder document {} is malformed ({}), starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(
            "Opened reminder store at {} with {} records",
            path.display(),
            reminders.len()
        );
        Ok(Self {
            path,
            reminders: RwLock::new(reminders),
        })
    }

    async fn persist(&self, map: &HashMap<String, Reminder>) -> Result<()> {
        let mut list: Vec<&Reminder> = map.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_vec_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ReminderStore for FileReminderStore {
    async fn create(&self, reminder: Reminder) -> Result<Reminder> {
        ReminderMap::validate(&reminder)?;
        let mut map = self.reminders.write().await;
        map.insert(reminder.id.clone(), reminder.clone());
        self.persist(&map).await?;
        Ok(reminder)
    }

    async fn get(&self, id: &str) -> Result<Reminder> {
        ReminderMap::get(&*self.reminders.read().await, id)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_for_user(
            &*self.reminders.read().await,
            user_id,
        ))
    }

    async fn list_enabled(&self) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_enabled(&*self.reminders.read().await))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        Ok(ReminderMap::list_due(&*self.reminders.read().await, now))
    }

    async fn mark_sent(&self, id: &str, now: DateTime<Utc>, missed: bool) -> Result<Reminder> {
        let mut map = self.reminders.write().await;
        let reminder = ReminderMap::mark_sent(&mut map, id, now, missed)?;
        self.persist(&map).await?;
        Ok(reminder)
    }

    async fn apply_snooze(&self, req: &SnoozeRequest) -> Result<Reminder> {
        let mut map = self.reminders.write().await;
        let reminder = ReminderMap::apply_snooze(&mut map, req)?;
        self.persist(&map).await?;
        Ok(reminder)
    }

    async fn update_trigger(&self, id: &str, new_trigger_at: DateTime<Utc>) -> Result<Reminder> {
        let mut map = self.reminders.write().await;
        let reminder = ReminderMap::update_trigger(&mut map, id, new_trigger_at)?;
        self.persist(&map).await?;
        Ok(reminder)
    }

    async fn disable(&self, id: &str) -> Result<Reminder> {
        let mut map = self.reminders.write().await;
        let reminder = ReminderMap::disable(&mut map, id)?;
        self.persist(&map).await?;
        Ok(reminder)
    }

    async fn delete(&self, user_id: i64, id: &str) -> Result<()> {
        let mut map = self.reminders.write().await;
        ReminderMap::delete(&mut map, user_id, id)?;
        self.persist(&map).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<ReminderStats> {
        Ok(ReminderMap::stats(&*self.reminders.read().await))
    }
}

// ============================================================================
// Tests
// ============================================================================
