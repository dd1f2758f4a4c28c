//! Wizard kinds, steps and boundary-validated action payloads.
//!
//! The chat transport hands the engine loose string payloads; everything is
//! validated here into typed values before any engine logic runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Wizard kinds and steps
// ============================================================================

/// The kind of guided dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WizardKind {
    /// Create a calendar event.
    EventAdd,
    /// Create a reminder.
    ReminderCreate,
    /// Move an existing reminder.
    ReminderReschedule,
    /// Collect the user's timezone.
    #[serde(rename = "profile_set")]
    ProfileSetup,
}

impl WizardKind {
    /// Parse a wizard id from an action payload.
    pub fn from_wizard_id(id: &str) -> Option<Self> {
        match id {
            "event_add" => Some(Self::EventAdd),
            "reminder_create" => Some(Self::ReminderCreate),
            "reminder_reschedule" => Some(Self::ReminderReschedule),
            "profile_set" => Some(Self::ProfileSetup),
            _ => None,
        }
    }

    /// The transport-level id of this kind.
    pub fn wizard_id(&self) -> &'static str {
        match self {
            Self::EventAdd => "event_add",
            Self::ReminderCreate => "reminder_create",
            Self::ReminderReschedule => "reminder_reschedule",
            Self::ProfileSetup => "profile_set",
        }
    }

    /// The fixed forward step order for this kind.
    pub fn steps(&self) -> &'static [WizardStep] {
        match self {
            Self::ReminderCreate => &[
                WizardStep::AwaitTitle,
                WizardStep::AwaitDatetime,
                WizardStep::AwaitRecurrence,
                WizardStep::Confirm,
            ],
            Self::EventAdd => &[
                WizardStep::AwaitTitle,
                WizardStep::AwaitDatetime,
                WizardStep::Confirm,
            ],
            Self::ReminderReschedule => &[WizardStep::AwaitDatetime, WizardStep::Confirm],
            Self::ProfileSetup => &[WizardStep::AwaitTimezone, WizardStep::Confirm],
        }
    }

    /// The first step of this kind.
    pub fn first_step(&self) -> WizardStep {
        self.steps()[0]
    }

    /// The step after `step`, if any.
    pub fn next_step(&self, step: WizardStep) -> Option<WizardStep> {
        let steps = self.steps();
        let idx = steps.iter().position(|&s| s == step)?;
        steps.get(idx + 1).copied()
    }

    /// The step before `step`, if any.
    pub fn prev_step(&self, step: WizardStep) -> Option<WizardStep> {
        let steps = self.steps();
        let idx = steps.iter().position(|&s| s == step)?;
        idx.checked_sub(1).map(|i| steps[i])
    }

    /// Data keys that must be present before Confirm may execute.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::ReminderCreate | Self::EventAdd => &["title", "trigger_at"],
            Self::ReminderReschedule => &["reminder_id", "trigger_at"],
            Self::ProfileSetup => &["timezone"],
        }
    }

    /// Human name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::EventAdd => "создание события",
            Self::ReminderCreate => "создание напоминания",
            Self::ReminderReschedule => "перенос напоминания",
            Self::ProfileSetup => "настройка профиля",
        }
    }
}

/// A single step within a wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    AwaitTitle,
    AwaitDatetime,
    AwaitRecurrence,
    AwaitTimezone,
    Confirm,
}

impl WizardStep {
    /// Data keys collected at this step; pruned when the step is left via
    /// `back` so stale future-step data never survives a back-transition.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::AwaitTitle => &["title"],
            Self::AwaitDatetime => &["trigger_at"],
            Self::AwaitRecurrence => &["recurrence", "exdates"],
            Self::AwaitTimezone => &["timezone"],
            Self::Confirm => &[],
        }
    }

    /// The prompt shown when entering this step.
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::AwaitTitle => "О чём напомнить? Напишите текст.",
            Self::AwaitDatetime => {
                "Когда? Например: «2026-03-15 09:00», «завтра в 9» или «через 30 минут»."
            }
            Self::AwaitRecurrence => {
                "Как повторять? Например: «каждый день», «по будням», «каждые 2 недели по средам» или «нет»."
            }
            Self::AwaitTimezone => {
                "Укажите часовой пояс, например «Europe/Moscow»."
            }
            Self::Confirm => "Всё верно? Подтвердите или вернитесь назад.",
        }
    }
}

// ============================================================================
// Action payloads
// ============================================================================

/// Raw action payload as delivered by the chat transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ActionPayload {
    /// Operation name (`wizard_start`, `wizard_confirm`, ...).
    pub op: String,
    /// Target wizard kind for start/restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wizard_id: Option<String>,
    /// Reminder this action refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_id: Option<String>,
    /// Free-form value (strict recurrence grammar, timezone name, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Step name for `wizard_edit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Wizard kind to resume after a conflict choice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_target: Option<String>,
}

impl ActionPayload {
    /// Build a payload with just an op, for tests and simple callers.
    pub fn op(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Default::default()
        }
    }
}

/// Validated wizard operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardOp {
    Start,
    Continue,
    Restart,
    Cancel,
    Back,
    Edit,
    Confirm,
    SetRecurrence,
    ProfilePick,
    ProfileManual,
}

impl WizardOp {
    /// Parse the transport-level op string.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "wizard_start" => Some(Self::Start),
            "wizard_continue" => Some(Self::Continue),
            "wizard_restart" => Some(Self::Restart),
            "wizard_cancel" => Some(Self::Cancel),
            "wizard_back" => Some(Self::Back),
            "wizard_edit" => Some(Self::Edit),
            "wizard_confirm" => Some(Self::Confirm),
            "wizard_set_recurrence" => Some(Self::SetRecurrence),
            "wizard_profile_pick" => Some(Self::ProfilePick),
            "wizard_profile_manual" => Some(Self::ProfileManual),
            _ => None,
        }
    }
}

// ============================================================================
// Engine replies
// ============================================================================

/// The outcome of a completed wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WizardOutcome {
    ReminderCreated { reminder_id: String },
    EventCreated { event_id: String },
    ReminderRescheduled { reminder_id: String },
    ProfileSet { timezone: String },
    Cancelled,
}

/// What the engine asks the transport to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardReply {
    /// Ask the user for the next piece of input.
    Prompt { step: WizardStep, text: String },
    /// Refuse the input and re-prompt; the session does not advance.
    Refusal { reason: String, hint: Option<String> },
    /// A wizard is already active: resume it or restart with the new one.
    Choice {
        question: String,
        resume_target: String,
        restart_target: String,
    },
    /// Terminal: the side effect ran (or the wizard was cancelled).
    Done {
        message: String,
        outcome: WizardOutcome,
    },
}

impl WizardReply {
    /// Shorthand for a refusal with a corrective hint.
    pub fn refuse(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Refusal {
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
