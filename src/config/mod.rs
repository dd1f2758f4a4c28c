//! Configuration for the carillon reminder engine.

mod settings;

pub use settings::{Config, SchedulerConfig, StorageConfig, WizardConfig};
