use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Version written to and required from session files.
pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session data could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported session schema version {found} (expected {})", SCHEMA_VERSION)]
    UnsupportedSchema { found: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Output and behaviour preferences carried into every run of the session.
    #[serde(default)]
    pub preferences: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub run_state_snapshot: Option<serde_json::Value>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

fn default_active() -> bool {
    true
}

impl Session {
    pub fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_accessed: now,
            is_active: true,
            user_id: None,
            preferences: BTreeMap::new(),
            run_state_snapshot: None,
            conversation_history: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            is_active: self.is_active,
            user_id: self.user_id.clone(),
            preferences: self.preferences.clone(),
            conversation_count: self.conversation_history.len(),
            context_keys: self.context.keys().cloned().collect(),
            has_workflow_state: self.run_state_snapshot.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
    pub user_id: Option<String>,
    pub preferences: BTreeMap<String, serde_json::Value>,
    pub conversation_count: usize,
    pub context_keys: Vec<String>,
    pub has_workflow_state: bool,
}

/// Keyed session persistence. `update` runs its closure while the store is
/// locked, so concurrent read-modify-write cycles on one key never interleave.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Session>, SessionError>;
    async fn put(&self, key: &str, session: Session) -> Result<(), SessionError>;
    async fn delete(&self, key: &str) -> Result<bool, SessionError>;
    async fn keys(&self) -> Result<Vec<String>, SessionError>;
    async fn update(&self, key: &str, apply: &(dyn for<'s> Fn(&'s mut Session) + Send + Sync)) -> Result<bool, SessionError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, session: Session) -> Result<(), SessionError> {
        self.sessions.lock().await.insert(key.to_string(), session);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.lock().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.sessions.lock().await.keys().cloned().collect())
    }

    async fn update(&self, key: &str, apply: &(dyn for<'s> Fn(&'s mut Session) + Send + Sync)) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(key) {
            Some(session) => {
                apply(session);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Serialize)]
struct SessionFileRef<'a> {
    schema_version: u64,
    sessions: &'a BTreeMap<String, Session>,
}

#[derive(Deserialize)]
struct SessionFile {
    sessions: BTreeMap<String, Session>,
}

/// All sessions in one JSON document, rewritten on every change. The cached
/// map only changes once the write has succeeded.
pub struct FileSessionStore {
    path: PathBuf,
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl FileSessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let sessions = match fs::read_to_string(&path).await {
            Ok(content) => decode_sessions(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), count = sessions.len(), "session store opened");
        Ok(Self {
            path,
            sessions: Mutex::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, sessions: &BTreeMap<String, Session>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(&SessionFileRef {
            schema_version: SCHEMA_VERSION,
            sessions,
        })?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content).await?;
        fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "session store written");
        Ok(())
    }
}

fn decode_sessions(content: &str) -> Result<BTreeMap<String, Session>, SessionError> {
    let raw: serde_json::Value = serde_json::from_str(content)?;
    let found = raw.get("schema_version").and_then(serde_json::Value::as_u64).unwrap_or(0);
    if found != SCHEMA_VERSION {
        return Err(SessionError::UnsupportedSchema { found });
    }
    let file: SessionFile = serde_json::from_value(raw)?;
    Ok(file.sessions)
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, session: Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let mut next = sessions.clone();
        next.insert(key.to_string(), session);
        self.persist(&next).await?;
        *sessions = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(key) {
            return Ok(false);
        }
        let mut next = sessions.clone();
        next.remove(key);
        self.persist(&next).await?;
        *sessions = next;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.sessions.lock().await.keys().cloned().collect())
    }

    async fn update(&self, key: &str, apply: &(dyn for<'s> Fn(&'s mut Session) + Send + Sync)) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let mut next = sessions.clone();
        match next.get_mut(key) {
            Some(session) => apply(session),
            None => return Ok(false),
        }
        self.persist(&next).await?;
        *sessions = next;
        Ok(true)
    }
}

/// Session lifecycle on top of any [`SessionStore`].
#[derive(Clone)]
pub struct SessionMemory {
    store: Arc<dyn SessionStore>,
    max_history: usize,
}

impl SessionMemory {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, max_history: 100 }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub async fn create(&self) -> Result<String, SessionError> {
        self.create_session(None).await
    }

    pub async fn create_for_user(&self, user_id: &str) -> Result<String, SessionError> {
        self.create_session(Some(user_id.to_string())).await
    }

    async fn create_session(&self, user_id: Option<String>) -> Result<String, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let mut session = Session::new(session_id.clone());
        session.user_id = user_id;
        self.store.put(&session_id, session).await?;
        info!(session_id = %session_id, "session created");
        Ok(session_id)
    }

    /// Returns the session and marks it as accessed now.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let now = Utc::now();
        if !self.store.update(session_id, &|s: &mut Session| s.last_accessed = now).await? {
            return Ok(None);
        }
        self.store.get(session_id).await
    }

    /// Stores `session` under `session_id`. Refuses a session whose own id differs.
    pub async fn put(&self, session_id: &str, session: Session) -> Result<bool, SessionError> {
        if session.session_id != session_id {
            return Ok(false);
        }
        self.store.put(session_id, session).await?;
        Ok(true)
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        let deleted = self.store.delete(session_id).await?;
        if deleted {
            info!(session_id = %session_id, "session deleted");
        }
        Ok(deleted)
    }

    /// Keeps the session but hides it from [`SessionMemory::list_active`].
    pub async fn deactivate(&self, session_id: &str) -> Result<bool, SessionError> {
        let now = Utc::now();
        let found = self
            .store
            .update(session_id, &|s: &mut Session| {
                s.is_active = false;
                s.last_accessed = now;
            })
            .await?;
        if found {
            info!(session_id = %session_id, "session deactivated");
        }
        Ok(found)
    }

    pub async fn list_active(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut summaries = Vec::new();
        for key in self.store.keys().await? {
            if let Some(session) = self.store.get(&key).await? {
                if session.is_active {
                    summaries.push(session.summary());
                }
            }
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(summaries)
    }

    /// Deletes every session idle for longer than `idle_timeout`.
    pub async fn expire(&self, idle_timeout: Duration) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut purged = 0;
        for key in self.store.keys().await? {
            let idle = match self.store.get(&key).await? {
                Some(session) => now - session.last_accessed > idle_timeout,
                None => false,
            };
            if idle && self.store.delete(&key).await? {
                info!(session_id = %key, "expired session removed");
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn store_run_state<T: Serialize + Sync>(&self, session_id: &str, state: &T) -> Result<bool, SessionError> {
        let snapshot = serde_json::to_value(state)?;
        let now = Utc::now();
        self.store
            .update(session_id, &|s: &mut Session| {
                s.run_state_snapshot = Some(snapshot.clone());
                s.last_accessed = now;
            })
            .await
    }

    pub async fn load_run_state<T: DeserializeOwned>(&self, session_id: &str) -> Result<Option<T>, SessionError> {
        let snapshot = match self.get(session_id).await? {
            Some(session) => session.run_state_snapshot,
            None => None,
        };
        match snapshot {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn add_conversation_entry(&self, session_id: &str, role: &str, content: &str) -> Result<bool, SessionError> {
        let now = Utc::now();
        let max_history = self.max_history;
        let entry = ConversationEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now,
        };
        self.store
            .update(session_id, &|s: &mut Session| {
                s.conversation_history.push(entry.clone());
                let excess = s.conversation_history.len().saturating_sub(max_history);
                s.conversation_history.drain(..excess);
                s.last_accessed = now;
            })
            .await
    }

    pub async fn update_context(&self, session_id: &str, key: &str, value: serde_json::Value) -> Result<bool, SessionError> {
        let now = Utc::now();
        self.store
            .update(session_id, &|s: &mut Session| {
                s.context.insert(key.to_string(), value.clone());
                s.last_accessed = now;
            })
            .await
    }

    /// Merges `preferences` into the stored ones.
    pub async fn update_preferences(
        &self,
        session_id: &str,
        preferences: BTreeMap<String, serde_json::Value>,
    ) -> Result<bool, SessionError> {
        let now = Utc::now();
        self.store
            .update(session_id, &|s: &mut Session| {
                s.preferences.extend(preferences.clone());
                s.last_accessed = now;
            })
            .await
    }

    pub async fn get_context(&self, session_id: &str, key: &str) -> Result<Option<serde_json::Value>, SessionError> {
        Ok(self
            .get(session_id)
            .await?
            .and_then(|mut session| session.context.remove(key)))
    }

    /// Summary without touching `last_accessed`.
    pub async fn summary(&self, session_id: &str) -> Result<Option<SessionSummary>, SessionError> {
        Ok(self.store.get(session_id).await?.map(|s| s.summary()))
    }
}
