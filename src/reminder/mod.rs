//! Reminder records, their stores, and the background delivery loop.

pub mod scheduler;
pub mod store;
pub mod types;

pub use scheduler::{Clock, Notifier, Scheduler, SystemClock, TickReport};
pub use store::{FileReminderStore, MemoryReminderStore, ReminderStore};
pub use types::{Reminder, ReminderStats, ReminderStatus, SnoozeRequest};
