//! Carillon: a conversational reminder engine.
//!
//! Carillon turns chat messages into scheduled notifications. It provides:
//!
//! - **Wizards**: guided multi-step dialogs that collect a reminder's
//!   fields one message at a time, persist their state between messages,
//!   and perform their side effect exactly once on confirmation.
//! - **Recurrence**: Russian natural-language recurrence parsing («каждые
//!   2 недели по средам»), a compact RRULE-style wire form, and
//!   timezone-aware occurrence arithmetic that keeps a daily 09:00
//!   reminder at 09:00 across DST transitions.
//! - **Series**: recurring series with per-occurrence exceptions and
//!   scoped edits (this occurrence only, the whole series, or this and
//!   all future occurrences).
//! - **Delivery**: a reminder store with grace-window and rollover
//!   semantics, snooze, and a background scheduler that retries transient
//!   failures and writes off what an outage swallowed.

pub mod config;
pub mod error;
pub mod logging;
pub mod recurrence;
pub mod reminder;
pub mod wizard;

pub use config::Config;
pub use error::{CarillonError, Result};
pub use recurrence::{RecurrenceSeries, RecurrenceSpec};
pub use reminder::{Reminder, ReminderStore, Scheduler};
pub use wizard::{WizardEngine, WizardReply};
