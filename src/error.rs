//! Error types for the carillon reminder engine.

use thiserror::Error;

/// Main error type for carillon operations.
#[derive(Error, Debug)]
pub enum CarillonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Wizard-session errors.
///
/// User-facing refusals (bad input, expired session) are not errors; they
/// travel as `WizardReply::Refusal` values. These variants cover genuine
/// faults in session handling.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found for user {user_id} in chat {chat_id}")]
    NotFound { user_id: i64, chat_id: i64 },

    #[error("Session backend error: {0}")]
    Backend(String),
}

/// Recurrence parsing and arithmetic errors.
#[derive(Error, Debug)]
pub enum RecurrenceError {
    #[error("Weekday out of range: {0} (expected 0-6, Monday=0)")]
    WeekdayOutOfRange(u32),

    #[error("Day of month out of range: {0} (expected 1-31)")]
    MonthdayOutOfRange(u32),

    #[error("Interval must be between 1 and 1000, got {0}")]
    IntervalOutOfRange(u32),

    #[error("Unrecognized recurrence grammar: {0}")]
    Grammar(String),

    #[error("Malformed RRULE: {0}")]
    Rrule(String),

    #[error("Invalid recurrence shape: {0}")]
    InvalidShape(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid date in recurrence phrase: {0}")]
    BadDate(String),
}

/// Storage-related errors (reminders, series).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {id} is not owned by user {user_id}")]
    WrongOwner { id: String, user_id: i64 },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery errors from the external notifier collaborator.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Notifier unreachable: {0}")]
    Unreachable(String),

    #[error("Reminder {0} has no chat to deliver to")]
    NoChat(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Result type alias for carillon operations.
pub type Result<T> = std::result::Result<T, CarillonError>;
