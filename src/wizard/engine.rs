//! The wizard state machine.
//!
//! One engine instance serves every user; per-dialog state lives in the
//! session store. `handle_text` consumes free-text replies to the current
//! step, `handle_action` consumes structured payloads from inline buttons.
//! Every failure here is a local recovery: bad input refuses and re-prompts
//! the same step, and nothing escalates past a `WizardReply`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::Result;
use crate::recurrence::{parse_strict, RecurrenceParser, RecurrenceSpec};

use super::datetext::DateTextParser;
use super::session::WizardSession;
use super::store::SessionStore;
use super::types::{ActionPayload, WizardKind, WizardOp, WizardOutcome, WizardReply, WizardStep};

// ============================================================================
// Backend seam
// ============================================================================

/// Side effects a confirmed wizard may perform.
///
/// The engine is the only caller, and it calls at most once per confirm.
/// Implementations talk to the reminder store and, for events, whatever
/// calendar backend is wired in.
#[async_trait]
pub trait WizardBackend: Send + Sync {
    /// Create a reminder; returns its id. `exdates` lists local dates a
    /// recurring reminder skips («кроме 10.03»).
    async fn create_reminder(
        &self,
        user_id: i64,
        chat_id: i64,
        title: &str,
        trigger_at: DateTime<Tz>,
        recurrence: Option<RecurrenceSpec>,
        exdates: &[NaiveDate],
    ) -> Result<String>;

    /// Create a calendar event; returns its id.
    async fn create_event(
        &self,
        user_id: i64,
        chat_id: i64,
        title: &str,
        start_at: DateTime<Tz>,
    ) -> Result<String>;

    /// Move an existing reminder.
    async fn reschedule_reminder(
        &self,
        user_id: i64,
        reminder_id: &str,
        new_trigger_at: DateTime<Tz>,
    ) -> Result<()>;

    /// Store the user's timezone.
    async fn set_profile_timezone(&self, user_id: i64, timezone: Tz) -> Result<()>;
}

// ============================================================================
// Engine
// ============================================================================

/// The wizard engine.
pub struct WizardEngine<S: SessionStore, B: WizardBackend> {
    sessions: Arc<S>,
    backend: Arc<B>,
    timezone: Tz,
}

impl<S: SessionStore, B: WizardBackend> WizardEngine<S, B> {
    pub fn new(sessions: Arc<S>, backend: Arc<B>, timezone: Tz) -> Self {
        Self {
            sessions,
            backend,
            timezone,
        }
    }

    /// Feed a free-text message into the active wizard.
    ///
    /// Returns `None` when no session exists so the caller can fall through
    /// to its other routing.
    pub async fn handle_text(
        &self,
        user_id: i64,
        chat_id: i64,
        text: &str,
    ) -> Result<Option<WizardReply>> {
        let (session, expired) = self.sessions.load(user_id, chat_id).await?;
        if expired {
            return Ok(Some(Self::expired_reply()));
        }
        let Some(mut session) = session else {
            return Ok(None);
        };

        let reply = self.consume_text(&mut session, text);
        match &reply {
            WizardReply::Refusal { .. } => {
                // The step did not advance; nothing to persist.
            }
            _ => self.sessions.save(user_id, chat_id, &session).await?,
        }
        Ok(Some(reply))
    }

    /// Dispatch a structured wizard action.
    pub async fn handle_action(
        &self,
        user_id: i64,
        chat_id: i64,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        let Some(op) = WizardOp::parse(&payload.op) else {
            return Ok(WizardReply::refuse(
                format!("Неизвестная команда «{}».", payload.op),
                "Вернитесь в меню и попробуйте ещё раз.",
            ));
        };

        let (session, expired) = self.sessions.load(user_id, chat_id).await?;
        if expired && op != WizardOp::Start && op != WizardOp::Restart {
            return Ok(Self::expired_reply());
        }

        match op {
            WizardOp::Start => self.op_start(user_id, chat_id, session, payload).await,
            WizardOp::Restart => self.op_restart(user_id, chat_id, payload).await,
            WizardOp::Cancel => {
                self.sessions.clear(user_id, chat_id).await?;
                Ok(WizardReply::Done {
                    message: "Хорошо, отменил.".to_string(),
                    outcome: WizardOutcome::Cancelled,
                })
            }
            WizardOp::Continue => match session {
                Some(session) => Ok(self.prompt_for(&session)),
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::Back => match session {
                Some(mut session) => {
                    let now = Utc::now();
                    match session.back(now) {
                        Some(_) => {
                            self.sessions.save(user_id, chat_id, &session).await?;
                            Ok(self.prompt_for(&session))
                        }
                        None => Ok(WizardReply::refuse(
                            "Это первый шаг, назад некуда.",
                            "Ответьте на вопрос или отмените диалог.",
                        )),
                    }
                }
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::Edit => match session {
                Some(session) => self.op_edit(user_id, chat_id, session, payload).await,
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::SetRecurrence => match session {
                Some(session) => {
                    self.op_set_recurrence(user_id, chat_id, session, payload)
                        .await
                }
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::ProfilePick => match session {
                Some(session) => {
                    self.op_profile_pick(user_id, chat_id, session, payload).await
                }
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::ProfileManual => match session {
                Some(mut session) => {
                    session.advance(WizardStep::AwaitTimezone, Utc::now());
                    self.sessions.save(user_id, chat_id, &session).await?;
                    Ok(self.prompt_for(&session))
                }
                None => Ok(Self::no_session_reply()),
            },
            WizardOp::Confirm => match session {
                Some(session) => self.op_confirm(user_id, chat_id, session).await,
                None => Ok(Self::no_session_reply()),
            },
        }
    }

    // ========================================================================
    // Ops
    // ========================================================================

    async fn op_start(
        &self,
        user_id: i64,
        chat_id: i64,
        active: Option<WizardSession>,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        let Some(kind) = payload.wizard_id.as_deref().and_then(WizardKind::from_wizard_id)
        else {
            return Ok(WizardReply::refuse(
                "Не указан тип диалога.",
                "Передайте wizard_id, например reminder_create.",
            ));
        };

        // Never silently overwrite an active wizard.
        if let Some(active) = active {
            return Ok(WizardReply::Choice {
                question: format!(
                    "У вас уже идёт {}. Продолжить его или начать заново?",
                    active.kind.display_name()
                ),
                resume_target: active.kind.wizard_id().to_string(),
                restart_target: kind.wizard_id().to_string(),
            });
        }

        let session = self.fresh_session(kind, payload);
        self.sessions.save(user_id, chat_id, &session).await?;
        debug!("Started {} wizard for user {user_id}", kind.display_name());
        Ok(self.prompt_for(&session))
    }

    async fn op_restart(
        &self,
        user_id: i64,
        chat_id: i64,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        // Restart clears the old session first, then starts the new one.
        self.sessions.clear(user_id, chat_id).await?;
        let target = payload
            .wizard_id
            .as_deref()
            .or(payload.resume_target.as_deref());
        let Some(kind) = target.and_then(WizardKind::from_wizard_id) else {
            return Ok(WizardReply::refuse(
                "Не указан тип диалога для перезапуска.",
                "Передайте wizard_id, например reminder_create.",
            ));
        };
        let session = self.fresh_session(kind, payload);
        self.sessions.save(user_id, chat_id, &session).await?;
        Ok(self.prompt_for(&session))
    }

    async fn op_edit(
        &self,
        user_id: i64,
        chat_id: i64,
        mut session: WizardSession,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        let target = payload.target.as_deref().unwrap_or_default();
        let step = match target {
            "await_title" => Some(WizardStep::AwaitTitle),
            "await_datetime" => Some(WizardStep::AwaitDatetime),
            "await_recurrence" => Some(WizardStep::AwaitRecurrence),
            "await_timezone" => Some(WizardStep::AwaitTimezone),
            _ => None,
        };
        let Some(step) = step.filter(|s| session.kind.steps().contains(s)) else {
            return Ok(WizardReply::refuse(
                format!("Шаг «{target}» недоступен в этом диалоге."),
                "Выберите один из предложенных шагов.",
            ));
        };

        // Re-answering a step invalidates what was collected there.
        for field in step.fields() {
            session.data.remove(*field);
        }
        session.advance(step, Utc::now());
        self.sessions.save(user_id, chat_id, &session).await?;
        Ok(self.prompt_for(&session))
    }

    async fn op_set_recurrence(
        &self,
        user_id: i64,
        chat_id: i64,
        mut session: WizardSession,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        let value = payload.value.as_deref().unwrap_or("none");
        match parse_strict(value) {
            Ok(spec) => {
                self.store_recurrence(&mut session, spec, &[]);
                session.advance(WizardStep::Confirm, Utc::now());
                self.sessions.save(user_id, chat_id, &session).await?;
                Ok(self.prompt_for(&session))
            }
            Err(e) => Ok(WizardReply::refuse(
                format!("Не понял повторение: {e}"),
                "Например: daily, weekdays, weekly:0,2,4 или monthly:15.",
            )),
        }
    }

    async fn op_profile_pick(
        &self,
        user_id: i64,
        chat_id: i64,
        mut session: WizardSession,
        payload: &ActionPayload,
    ) -> Result<WizardReply> {
        let value = payload.value.as_deref().unwrap_or_default();
        let Ok(tz) = value.parse::<Tz>() else {
            return Ok(WizardReply::refuse(
                format!("Не знаю такой часовой пояс: «{value}»."),
                "Например: Europe/Moscow или Asia/Yekaterinburg.",
            ));
        };
        session.set("timezone", tz.name());
        session.advance(WizardStep::Confirm, Utc::now());
        self.sessions.save(user_id, chat_id, &session).await?;
        Ok(self.prompt_for(&session))
    }

    async fn op_confirm(
        &self,
        user_id: i64,
        chat_id: i64,
        session: WizardSession,
    ) -> Result<WizardReply> {
        if session.step != WizardStep::Confirm || !session.is_complete() {
            return Ok(WizardReply::refuse(
                "Ещё не всё заполнено.",
                "Ответьте на оставшиеся вопросы, затем подтвердите.",
            ));
        }

        // Clear before executing: a retried confirm after success finds no
        // session and becomes a refusal, not a duplicate side effect.
        self.sessions.clear(user_id, chat_id).await?;

        match self.execute(user_id, chat_id, &session).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // Backend failure: put the session back so the user can
                // retry confirm without re-entering everything.
                warn!("Wizard confirm side effect failed for user {user_id}: {e}");
                self.sessions.save(user_id, chat_id, &session).await?;
                Ok(WizardReply::refuse(
                    "Не получилось сохранить, попробуйте подтвердить ещё раз.",
                    "Если не поможет — отмените и начните заново.",
                ))
            }
        }
    }

    /// Run the terminal side effect for a complete session.
    async fn execute(
        &self,
        user_id: i64,
        chat_id: i64,
        session: &WizardSession,
    ) -> Result<WizardReply> {
        match session.kind {
            WizardKind::ReminderCreate => {
                let title = session.get_str("title").unwrap_or_default();
                let trigger_at = self.stored_trigger(session)?;
                let recurrence = self.stored_recurrence(session);
                let exdates = self.stored_exdates(session);
                let reminder_id = self
                    .backend
                    .create_reminder(
                        user_id,
                        chat_id,
                        title,
                        trigger_at,
                        recurrence.clone(),
                        &exdates,
                    )
                    .await?;
                let when = trigger_at.format("%d.%m.%Y %H:%M");
                let suffix = recurrence
                    .map(|spec| format!(", {}", spec.label()))
                    .unwrap_or_default();
                Ok(WizardReply::Done {
                    message: format!("Напомню: «{title}» — {when}{suffix}."),
                    outcome: WizardOutcome::ReminderCreated { reminder_id },
                })
            }
            WizardKind::EventAdd => {
                let title = session.get_str("title").unwrap_or_default();
                let start_at = self.stored_trigger(session)?;
                let event_id = self
                    .backend
                    .create_event(user_id, chat_id, title, start_at)
                    .await?;
                Ok(WizardReply::Done {
                    message: format!(
                        "Событие «{title}» создано на {}.",
                        start_at.format("%d.%m.%Y %H:%M")
                    ),
                    outcome: WizardOutcome::EventCreated { event_id },
                })
            }
            WizardKind::ReminderReschedule => {
                let reminder_id = session.get_str("reminder_id").unwrap_or_default().to_string();
                let trigger_at = self.stored_trigger(session)?;
                self.backend
                    .reschedule_reminder(user_id, &reminder_id, trigger_at)
                    .await?;
                Ok(WizardReply::Done {
                    message: format!(
                        "Перенёс напоминание на {}.",
                        trigger_at.format("%d.%m.%Y %H:%M")
                    ),
                    outcome: WizardOutcome::ReminderRescheduled { reminder_id },
                })
            }
            WizardKind::ProfileSetup => {
                let name = session.get_str("timezone").unwrap_or_default().to_string();
                let tz: Tz = name.parse().map_err(|_| {
                    crate::error::RecurrenceError::UnknownTimezone(name.clone())
                })?;
                self.backend.set_profile_timezone(user_id, tz).await?;
                Ok(WizardReply::Done {
                    message: format!("Часовой пояс сохранён: {name}."),
                    outcome: WizardOutcome::ProfileSet { timezone: name },
                })
            }
        }
    }

    // ========================================================================
    // Free-text step handling
    // ========================================================================

    fn consume_text(&self, session: &mut WizardSession, text: &str) -> WizardReply {
        let now = Utc::now();
        let text = text.trim();
        match session.step {
            WizardStep::AwaitTitle => {
                if text.is_empty() {
                    return WizardReply::refuse(
                        "Текст пустой.",
                        "Напишите, о чём напомнить, например «Купить молоко».",
                    );
                }
                // Fast path: one message with both a date phrase and a title
                // jumps straight to confirmation.
                if let Some(found) = self.date_parser().extract(text) {
                    session.set("title", found.title);
                    session.set("trigger_at", found.instant.to_rfc3339());
                    session.advance(WizardStep::Confirm, now);
                    return self.prompt_for(session);
                }
                session.set("title", text);
                let next = session
                    .kind
                    .next_step(WizardStep::AwaitTitle)
                    .unwrap_or(WizardStep::Confirm);
                session.advance(next, now);
                self.prompt_for(session)
            }
            WizardStep::AwaitDatetime => match self.date_parser().parse_datetime(text) {
                Some(instant) => {
                    session.set("trigger_at", instant.to_rfc3339());
                    let next = session
                        .kind
                        .next_step(WizardStep::AwaitDatetime)
                        .unwrap_or(WizardStep::Confirm);
                    session.advance(next, now);
                    self.prompt_for(session)
                }
                None => WizardReply::refuse(
                    format!("Не понял дату «{text}»."),
                    "Например: «2026-03-15 09:00», «завтра в 9» или «через 30 минут».",
                ),
            },
            WizardStep::AwaitRecurrence => {
                // Accept the strict grammar and free text alike.
                let parsed = match parse_strict(text) {
                    Ok(spec) => Ok(spec.map(|s| (s, Vec::new()))),
                    Err(_) => self
                        .recurrence_parser()
                        .parse(text)
                        .map(|opt| opt.map(|p| (p.spec, p.exdates))),
                };
                match parsed {
                    Ok(spec) => {
                        match spec {
                            Some((spec, exdates)) => self.store_recurrence(
                                session,
                                Some(spec),
                                &exdates,
                            ),
                            None => self.store_recurrence(session, None, &[]),
                        }
                        session.advance(WizardStep::Confirm, now);
                        self.prompt_for(session)
                    }
                    Err(e) => WizardReply::refuse(
                        format!("Не понял повторение: {e}"),
                        "Например: «каждый день», «по будням», «каждые 2 недели по средам» или «нет».",
                    ),
                }
            }
            WizardStep::AwaitTimezone => match text.parse::<Tz>() {
                Ok(tz) => {
                    session.set("timezone", tz.name());
                    session.advance(WizardStep::Confirm, now);
                    self.prompt_for(session)
                }
                Err(_) => WizardReply::refuse(
                    format!("Не знаю такой часовой пояс: «{text}»."),
                    "Например: Europe/Moscow или Asia/Yekaterinburg.",
                ),
            },
            WizardStep::Confirm => self.prompt_for(session),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn fresh_session(&self, kind: WizardKind, payload: &ActionPayload) -> WizardSession {
        let mut session = WizardSession::new(kind, Utc::now());
        if let Some(reminder_id) = &payload.reminder_id {
            session.set("reminder_id", reminder_id.clone());
        }
        session
    }

    fn date_parser(&self) -> DateTextParser {
        DateTextParser::new(self.timezone)
    }

    fn recurrence_parser(&self) -> RecurrenceParser {
        RecurrenceParser::new(self.timezone)
    }

    fn store_recurrence(
        &self,
        session: &mut WizardSession,
        spec: Option<RecurrenceSpec>,
        exdates: &[NaiveDate],
    ) {
        match spec {
            Some(spec) => {
                session.set(
                    "recurrence",
                    serde_json::to_value(&spec).unwrap_or(serde_json::Value::Null),
                );
                if !exdates.is_empty() {
                    session.set(
                        "exdates",
                        serde_json::to_value(exdates).unwrap_or(serde_json::Value::Null),
                    );
                }
            }
            None => {
                session.data.remove("recurrence");
                session.data.remove("exdates");
            }
        }
    }

    fn stored_trigger(&self, session: &WizardSession) -> Result<DateTime<Tz>> {
        let raw = session.get_str("trigger_at").unwrap_or_default();
        let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| {
            crate::error::RecurrenceError::BadDate(raw.to_string())
        })?;
        Ok(parsed.with_timezone(&self.timezone))
    }

    fn stored_recurrence(&self, session: &WizardSession) -> Option<RecurrenceSpec> {
        session
            .data
            .get("recurrence")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn stored_exdates(&self, session: &WizardSession) -> Vec<NaiveDate> {
        session
            .data
            .get("exdates")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Render the prompt for the session's current step.
    fn prompt_for(&self, session: &WizardSession) -> WizardReply {
        let text = if session.step == WizardStep::Confirm {
            self.summary(session)
        } else {
            session.step.prompt().to_string()
        };
        WizardReply::Prompt {
            step: session.step,
            text,
        }
    }

    /// The confirm-step summary; recurrences go through the one label
    /// renderer.
    fn summary(&self, session: &WizardSession) -> String {
        let mut lines = Vec::new();
        match session.kind {
            WizardKind::ProfileSetup => {
                lines.push(format!(
                    "Часовой пояс: {}",
                    session.get_str("timezone").unwrap_or("—")
                ));
            }
            _ => {
                if let Some(title) = session.get_str("title") {
                    lines.push(format!("Текст: {title}"));
                }
                if let Ok(trigger) = self.stored_trigger(session) {
                    lines.push(format!("Когда: {}", trigger.format("%d.%m.%Y %H:%M")));
                }
                if let Some(spec) = self.stored_recurrence(session) {
                    lines.push(format!("Повторение: {}", spec.label()));
                    let exdates = self.stored_exdates(session);
                    if !exdates.is_empty() {
                        let listed: Vec<String> = exdates
                            .iter()
                            .map(|d| d.format("%d.%m").to_string())
                            .collect();
                        lines.push(format!("Кроме: {}", listed.join(", ")));
                    }
                }
            }
        }
        lines.push("Подтвердить?".to_string());
        lines.join("\n")
    }

    fn expired_reply() -> WizardReply {
        WizardReply::refuse(
            "Диалог истёк, я сбросил его.",
            "Начните заново через меню.",
        )
    }

    fn no_session_reply() -> WizardReply {
        WizardReply::refuse(
            "Сейчас нет активного диалога.",
            "Начните новый через меню.",
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
