//! Conversation sessions
//!
//! Each session id maps to one `ConversationState` behind an async mutex, so
//! requests within a session run one at a time while distinct sessions
//! progress in parallel. States are persisted through a `SessionStore`
//! after every request.

use super::turn::{TurnError, TurnMachine, TurnOutcome};
use crate::events::EventSender;
use crate::message::ConversationState;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to encode session state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to prepare session storage: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Load/save hook for conversation states
pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError>;
    fn save(&self, state: &ConversationState) -> Result<(), SessionError>;
    /// Known session ids, most recently updated first
    fn list(&self) -> Result<Vec<String>, SessionError>;
}

/// Keeps states for the life of the process
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, ConversationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError> {
        Ok(self.states.lock().get(session_id).cloned())
    }

    fn save(&self, state: &ConversationState) -> Result<(), SessionError> {
        self.states
            .lock()
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, SessionError> {
        let states = self.states.lock();
        let mut entries: Vec<(&String, _)> =
            states.iter().map(|(id, s)| (id, s.updated_at)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(entries.into_iter().map(|(id, _)| id.clone()).collect())
    }
}

/// SQLite-backed store: one JSON row per session
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, SessionError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SessionError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SessionStore for SqliteStore {
    fn load(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT state_json FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn save(&self, state: &ConversationState) -> Result<(), SessionError> {
        let json = serde_json::to_string(state)?;
        let updated_at = state.updated_at.unwrap_or_else(Utc::now).to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO sessions (id, state_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
            params![state.session_id, json, updated_at],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, SessionError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY updated_at DESC, id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

pub type SharedState = Arc<tokio::sync::Mutex<ConversationState>>;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    sessions: Mutex<HashMap<String, SharedState>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to a session, loading it from the store or starting fresh
    pub fn session(&self, session_id: &str) -> Result<SharedState, SessionError> {
        if let Some(state) = self.sessions.lock().get(session_id) {
            return Ok(state.clone());
        }

        let state = match self.store.load(session_id)? {
            Some(state) => {
                debug!(session = %session_id, messages = state.len(), "session restored");
                state
            }
            None => {
                info!(session = %session_id, "new session");
                ConversationState::new(session_id)
            }
        };

        // Another caller may have raced us here; keep whichever landed first
        let shared = self
            .sessions
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(state)))
            .clone();
        Ok(shared)
    }

    /// A fresh, unique session id
    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn save(&self, state: &ConversationState) -> Result<(), SessionError> {
        self.store.save(state)
    }

    pub fn known_sessions(&self) -> Result<Vec<String>, SessionError> {
        self.store.list()
    }

    /// Run one request on a session and persist the result.
    ///
    /// The session stays locked for the whole request. State is saved even
    /// when the request fails, since everything appended so far is valid.
    pub async fn handle(
        &self,
        machine: &TurnMachine,
        session_id: &str,
        input: &str,
        events: Option<&EventSender>,
    ) -> Result<TurnOutcome, RequestError> {
        let shared = self.session(session_id)?;
        let mut state = shared.lock().await;

        let outcome = machine.run(&mut state, input, events).await;
        state.updated_at = Some(Utc::now());
        if let Err(e) = self.store.save(&state) {
            warn!(session = %session_id, error = %e, "failed to persist session");
            if outcome.is_ok() {
                return Err(e.into());
            }
        }
        Ok(outcome?)
    }
}
