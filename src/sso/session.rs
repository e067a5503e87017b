//! Cached session for fast re-login.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

/// What a successful login yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub account: String,
    /// Opaque token the server accepts for session resume.
    pub token: Bytes,
}

/// Persists the session between connections.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<SessionData>;

    fn save(&self, session: &SessionData);

    /// Forget the cached session, e.g. after the server refused it.
    fn invalidate(&self);
}

/// Process-local store; forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: SessionData) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<SessionData> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, session: &SessionData) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    }

    fn invalidate(&self) {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
