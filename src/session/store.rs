//! Concurrent in-memory session registry.

use super::Session;
use crate::types::Tool;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already exists: {0}")]
    Exists(String),

    #[error("session not found: {0}")]
    NotFound(String),
}

/// Registry of live sessions. Reads go through the sharded map without
/// exclusive locking; writers take per-shard exclusive access.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session. Fails with [`SessionError::Exists`] when the id
    /// is already present; ephemeral POST callers tolerate that outcome.
    pub fn register(&self, session: Arc<Session>) -> Result<(), SessionError> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(SessionError::Exists(session.id.clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            },
        }
    }

    /// Remove a session. Idempotent.
    pub fn unregister(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Install per-session tool overrides.
    pub fn set_tools(&self, id: &str, tools: HashMap<String, Tool>) -> Result<(), SessionError> {
        match self.get(id) {
            Some(session) => {
                session.set_tools(tools);
                Ok(())
            },
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Extend a session's expiry to `now + ttl`.
    pub fn touch(&self, id: &str, ttl: Duration) -> Result<(), SessionError> {
        match self.get(id) {
            Some(session) => {
                session.touch(ttl);
                Ok(())
            },
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of sessions that have expired as of now.
    pub fn expired_ids(&self) -> Vec<String> {
        let now = Utc::now();
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Count of live sessions expiring within `window`.
    pub fn expiring_within(&self, window: Duration) -> usize {
        let now = Utc::now();
        let horizon = now + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.sessions
            .iter()
            .filter(|entry| {
                let expires = entry.value().expires_at();
                expires >= now && expires < horizon
            })
            .count()
    }
}
