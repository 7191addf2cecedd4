//! Session Management
//!
//! Registry of live WebSocket connections. The registry only holds the
//! shared handles (abort flag, activity clock); each connection task owns
//! its `ConversationSession`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_agent_pipeline::{AbortFlag, ActivityClock, ConversationSession};

use crate::ServerError;

/// Registry entry for one connection
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub device_id: String,
    pub created_at: Instant,
    abort: AbortFlag,
    activity: ActivityClock,
}

impl SessionHandle {
    fn from_session(session: &ConversationSession) -> Self {
        Self {
            id: session.id.clone(),
            device_id: session.device_id.clone(),
            created_at: Instant::now(),
            abort: session.abort_flag().clone(),
            activity: session.activity().clone(),
        }
    }

    /// Stop whatever the connection is currently playing
    pub fn abort(&self) {
        self.abort.set();
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Capacity-bounded session registry
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    max_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Fresh session id
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a connection's session
    pub fn create(&self, session: &ConversationSession) -> Result<Arc<SessionHandle>, ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Capacity(self.max_sessions));
        }
        if sessions.contains_key(&session.id) {
            return Err(ServerError::Session(format!(
                "session {} already registered",
                session.id
            )));
        }

        let handle = Arc::new(SessionHandle::from_session(session));
        sessions.insert(handle.id.clone(), handle.clone());

        tracing::info!(
            session_id = %handle.id,
            device_id = %handle.device_id,
            active = sessions.len(),
            "Session registered"
        );
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.write().remove(id);
        if let Some(handle) = &removed {
            tracing::info!(
                session_id = %handle.id,
                age_secs = handle.age().as_secs(),
                "Session removed"
            );
        }
        removed
    }

    /// Ids of all live sessions
    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}
