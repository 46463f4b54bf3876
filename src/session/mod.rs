//! MCP session state.
//!
//! One session type serves two lifetimes: POST handlers register an
//! ephemeral session for the duration of a single dispatch, while GET
//! handlers register a subscribing session that lives until the client
//! disconnects or the cleanup sweep removes it.

use crate::types::Tool;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

pub mod cleanup;
pub mod identity;
pub mod store;

pub use cleanup::{run_cleanup_loop, sweep, SweepStats};
pub use identity::{IdentityError, SessionIdentity, StatefulIdentity, StatelessIdentity};
pub use store::{SessionError, SessionStore};

/// Capacity of the per-session notification buffer. Producers never block:
/// a full buffer drops the notification.
pub const NOTIFICATION_BUFFER: usize = 100;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-client session bundle.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    expires_at: Mutex<DateTime<Utc>>,

    notification_tx: mpsc::Sender<Value>,
    notification_rx: Mutex<Option<mpsc::Receiver<Value>>>,

    /// Incoming MCP request headers preserved for auth resolution,
    /// lowercased names.
    pub auth_headers: HashMap<String, String>,

    tool_overrides: RwLock<HashMap<String, Tool>>,
}

impl Session {
    pub fn new(id: impl Into<String>, ttl: Duration, auth_headers: HashMap<String, String>) -> Arc<Self> {
        let now = Utc::now();
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Arc::new(Self {
            id: id.into(),
            created_at: now,
            expires_at: Mutex::new(now + chrono_ttl(ttl)),
            notification_tx: tx,
            notification_rx: Mutex::new(Some(rx)),
            auth_headers,
            tool_overrides: RwLock::new(HashMap::new()),
        })
    }

    /// Non-blocking notification send. Returns false when the buffer is
    /// full and the notification was dropped.
    pub fn notify(&self, notification: Value) -> bool {
        match self.notification_tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, "Notification buffer full; dropping notification");
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Take the receive half of the notification channel. Only one consumer
    /// may drain a session at a time.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Value>> {
        self.notification_rx.lock().take()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.lock()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }

    /// Extend the session lifetime to `now + ttl`.
    pub fn touch(&self, ttl: Duration) {
        *self.expires_at.lock() = Utc::now() + chrono_ttl(ttl);
    }

    pub fn set_tools(&self, tools: HashMap<String, Tool>) {
        *self.tool_overrides.write() = tools;
    }

    pub fn clear_tools(&self) {
        self.tool_overrides.write().clear();
    }

    /// Per-session tool overrides, if any were installed.
    pub fn tools_override(&self) -> Option<Vec<Tool>> {
        let overrides = self.tool_overrides.read();
        if overrides.is_empty() {
            None
        } else {
            let mut tools: Vec<Tool> = overrides.values().cloned().collect();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            Some(tools)
        }
    }
}

fn chrono_ttl(ttl: Duration) -> ChronoDuration {
    ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_follows_ttl() {
        let session = Session::new("s1", Duration::from_secs(60), HashMap::new());
        assert!(session.expires_at() > session.created_at);
        assert!(!session.is_expired(Utc::now()));

        let expired = Session::new("s2", Duration::ZERO, HashMap::new());
        std::thread::sleep(Duration::from_millis(5));
        assert!(expired.is_expired(Utc::now()));
    }

    #[test]
    fn test_touch_extends_expiry() {
        let session = Session::new("s1", Duration::from_secs(1), HashMap::new());
        let before = session.expires_at();
        session.touch(Duration::from_secs(3600));
        assert!(session.expires_at() > before);
    }

    #[test]
    fn test_notification_overflow_drops_without_blocking() {
        let session = Session::new("s1", DEFAULT_SESSION_TTL, HashMap::new());
        for i in 0..NOTIFICATION_BUFFER {
            assert!(session.notify(json!({"seq": i})));
        }
        // Buffer is at capacity; the next send is dropped, not blocked.
        assert!(!session.notify(json!({"seq": "overflow"})));
    }

    #[tokio::test]
    async fn test_receiver_taken_once() {
        let session = Session::new("s1", DEFAULT_SESSION_TTL, HashMap::new());
        assert!(session.take_receiver().is_some());
        assert!(session.take_receiver().is_none());
    }

    #[test]
    fn test_tool_overrides() {
        let session = Session::new("s1", DEFAULT_SESSION_TTL, HashMap::new());
        assert!(session.tools_override().is_none());

        let mut tools = HashMap::new();
        tools.insert(
            "echo".to_string(),
            Tool {
                name: "echo".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            },
        );
        session.set_tools(tools);
        assert_eq!(session.tools_override().unwrap().len(), 1);

        session.clear_tools();
        assert!(session.tools_override().is_none());
    }
}
