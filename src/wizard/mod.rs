//! Guided multi-step dialogs over a chat transport.
//!
//! A wizard collects fields one step at a time, survives restarts through
//! the session store, and performs its side effect exactly once on confirm.

pub mod datetext;
pub mod engine;
pub mod session;
pub mod store;
pub mod types;

pub use datetext::{DateTextMatch, DateTextParser};
pub use engine::{WizardBackend, WizardEngine};
pub use session::WizardSession;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{ActionPayload, WizardKind, WizardOp, WizardOutcome, WizardReply, WizardStep};
