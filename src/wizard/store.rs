//! Durable wizard-session storage keyed by `(user, conversation)`.
//!
//! Expiry is lazy: it is computed when a session is loaded, never by a
//! background sweep. An expired session is deleted as a side effect of the
//! load and reported through the `expired` flag so callers can render a
//! distinct message; the next load sees a clean `(None, false)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

use super::session::WizardSession;

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for a `(user, conversation)` pair.
    ///
    /// Returns `(None, true)` exactly once for a session that outlived the
    /// TTL (deleting it in passing), `(None, false)` when absent, and
    /// `(Some(..), false)` for a live session. A corrupt record is treated
    /// as absent, never raised.
    async fn load(&self, user_id: i64, chat_id: i64) -> Result<(Option<WizardSession>, bool)>;

    /// Persist the session, replacing any previous one for the pair.
    async fn save(&self, user_id: i64, chat_id: i64, session: &WizardSession) -> Result<()>;

    /// Delete the session, if any.
    async fn clear(&self, user_id: i64, chat_id: i64) -> Result<()>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// One JSON file per `(user, conversation)` pair under a sessions directory.
///
/// Writes go to a `.tmp` sibling and are atomically renamed into place, so
/// a crash mid-write never leaves a partial record visible.
pub struct FileSessionStore {
    dir: PathBuf,
    timeout: Duration,
}

impl FileSessionStore {
    /// Open (creating if needed) a session directory.
    pub fn open(dir: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, timeout })
    }

    fn path_for(&self, user_id: i64, chat_id: i64) -> PathBuf {
        self.dir.join(format!("u{user_id}_c{chat_id}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, user_id: i64, chat_id: i64) -> Result<(Option<WizardSession>, bool)> {
        let path = self.path_for(user_id, chat_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((None, false)),
            Err(e) => return Err(e.into()),
        };

        let session: WizardSession = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(e) => {
                // Corrupt record: degrade to "no session".
                warn!("Dropping malformed session file {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return Ok((None, false));
            }
        };

        if Utc::now() - session.updated_at > self.timeout {
            debug!("Session for user {user_id} in chat {chat_id} expired, deleting");
            tokio::fs::remove_file(&path).await?;
            return Ok((None, true));
        }
        Ok((Some(session), false))
    }

    async fn save(&self, user_id: i64, chat_id: i64, session: &WizardSession) -> Result<()> {
        let path = self.path_for(user_id, chat_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved session for user {user_id} in chat {chat_id}");
        Ok(())
    }

    async fn clear(&self, user_id: i64, chat_id: i64) -> Result<()> {
        let path = self.path_for(user_id, chat_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory session store for tests and embedded use.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<(i64, i64), WizardSession>>,
    timeout: Duration,
}

impl MemorySessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, user_id: i64, chat_id: i64) -> Result<(Option<WizardSession>, bool)> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(&(user_id, chat_id)) else {
            return Ok((None, false));
        };
        if Utc::now() - session.updated_at > self.timeout {
            sessions.remove(&(user_id, chat_id));
            return Ok((None, true));
        }
        Ok((Some(session.clone()), false))
    }

    async fn save(&self, user_id: i64, chat_id: i64, session: &WizardSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert((user_id, chat_id), session.clone());
        Ok(())
    }

    async fn clear(&self, user_id: i64, chat_id: i64) -> Result<()> {
        self.sessions.write().await.remove(&(user_id, chat_id));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
