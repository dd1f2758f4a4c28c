//! The background delivery loop.
//!
//! Each tick asks the store for due reminders and handles every one in
//! isolation: a failure on one never blocks the rest. A reminder past its
//! grace window is written off as missed without a delivery attempt, so a
//! long outage produces one rollover per reminder instead of a burst of
//! stale notifications.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;

use super::store::ReminderStore;
use super::types::Reminder;

// ============================================================================
// Collaborator seams
// ============================================================================

/// Outbound delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one reminder to its chat. An error leaves the reminder due,
    /// to be retried on the next tick.
    async fn deliver(&self, reminder: &Reminder) -> Result<()>;
}

/// Time source, swappable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Counters for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Delivered and concluded.
    pub delivered: usize,
    /// Written off without delivery (grace exceeded or no chat).
    pub missed: usize,
    /// Delivery failed; left due for the next tick.
    pub failed: usize,
}

/// Polls the store and drives due reminders through delivery.
pub struct Scheduler<S: ReminderStore, N: Notifier, C: Clock = SystemClock> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: C,
    tick_interval: StdDuration,
    grace: Duration,
}

impl<S: ReminderStore, N: Notifier> Scheduler<S, N, SystemClock> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        tick_interval: StdDuration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            clock: SystemClock,
            tick_interval,
            grace,
        }
    }
}

impl<S: ReminderStore, N: Notifier, C: Clock> Scheduler<S, N, C> {
    /// Build a scheduler around an explicit clock.
    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        clock: C,
        tick_interval: StdDuration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            tick_interval,
            grace,
        }
    }

    /// Log what survives a restart. Reminders whose trigger is already in
    /// the past are left for the first tick to sort out through the grace
    /// window and rollover rules.
    pub async fn restore(&self) -> Result<usize> {
        let now = self.clock.now();
        let enabled = self.store.list_enabled().await?;
        let future = enabled.iter().filter(|r| r.trigger_at > now).count();
        let overdue = enabled.len() - future;
        info!("Restored {future} pending reminders ({overdue} overdue, resolving on first tick)");
        Ok(future)
    }

    /// Run the polling loop until the task is dropped.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = self.clock.now();
            match self.tick(now).await {
                Ok(report) if report != TickReport::default() => {
                    debug!(
                        "Tick: {} delivered, {} missed, {} failed",
                        report.delivered, report.missed, report.failed
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Scheduler tick failed: {e}"),
            }
        }
    }

    /// Process everything due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.store.list_due(now).await?;
        let mut report = TickReport::default();

        for reminder in due {
            match self.handle_due(&reminder, now).await {
                Ok(Outcome::Delivered) => report.delivered += 1,
                Ok(Outcome::Missed) => report.missed += 1,
                Ok(Outcome::LeftDue) => report.failed += 1,
                Err(e) => {
                    // Store trouble on this one reminder; keep going.
                    warn!("Failed to conclude reminder {}: {e}", reminder.id);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn handle_due(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<Outcome> {
        if reminder.chat_id.is_none() {
            warn!("Reminder {} has no chat, writing off as missed", reminder.id);
            self.store.mark_sent(&reminder.id, now, true).await?;
            return Ok(Outcome::Missed);
        }

        if now - reminder.trigger_at > self.grace {
            debug!(
                "Reminder {} is {}min past its trigger, writing off as missed",
                reminder.id,
                (now - reminder.trigger_at).num_minutes()
            );
            self.store.mark_sent(&reminder.id, now, true).await?;
            return Ok(Outcome::Missed);
        }

        match self.notifier.deliver(reminder).await {
            Ok(()) => {
                self.store.mark_sent(&reminder.id, now, false).await?;
                Ok(Outcome::Delivered)
            }
            Err(e) => {
                // Leave it due; the next tick retries until grace runs out.
                warn!("Delivery of reminder {} failed: {e}", reminder.id);
                Ok(Outcome::LeftDue)
            }
        }
    }
}

enum Outcome {
    Delivered,
    Missed,
    LeftDue,
}

// ============================================================================
// Tests
// ============================================================================
