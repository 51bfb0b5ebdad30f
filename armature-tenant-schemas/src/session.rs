//! Session state used for session-pinned tenancy.
//!
//! The resolved schema name is stored under [`SCHEMA_SESSION_KEY`] so later
//! requests in the same session skip hostname resolution.

use crate::error::{Result, TenantError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved session key holding the pinned schema name.
pub const SCHEMA_SESSION_KEY: &str = "__schema_name__";

/// Session data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Session data as key-value pairs
    pub data: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data: HashMap::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Create a session with a random id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| TenantError::Session(e.to_string()))?;
        self.data.insert(key.to_string(), json_value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    /// Schema pinned by an earlier request, if any. Empty strings count as unset.
    pub fn schema_name(&self) -> Option<String> {
        self.get::<String>(SCHEMA_SESSION_KEY)
            .filter(|s| !s.is_empty())
    }

    /// Like [`Session::schema_name`], but a value that is present and not a
    /// string is reported as a tampered session.
    pub fn pinned_schema(&self) -> Result<Option<String>> {
        match self.data.get(SCHEMA_SESSION_KEY) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(TenantError::InvalidSessionTenant(other.to_string())),
        }
    }

    pub fn set_schema_name(&mut self, schema_name: &str) -> Result<()> {
        self.set(SCHEMA_SESSION_KEY, schema_name)
    }

    pub fn clear_schema_name(&mut self) {
        self.data.remove(SCHEMA_SESSION_KEY);
    }

    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }
}

/// Session persistence (implement with your session backend).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>>;

    async fn save(&self, session: &Session) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().remove(id);
        Ok(())
    }
}
