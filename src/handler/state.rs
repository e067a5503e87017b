//! Handler states.
//!
//! A [`State`] is built when it is entered and never mutated afterwards.
//! Resources a state owns are released by the transition that leaves it.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use crate::error::Error;
use crate::net::Connection;

/// The in-flight connect attempt; every waiter polls the same future.
pub type ConnectAttempt = Shared<BoxFuture<'static, Result<(), Error>>>;

/// Discriminant of a [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Initialized,
    Connecting,
    Loading,
    Ok,
    ConnectionLost,
    Closed,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Initialized => "initialized",
            StateKind::Connecting => "connecting",
            StateKind::Loading => "loading",
            StateKind::Ok => "ok",
            StateKind::ConnectionLost => "connection_lost",
            StateKind::Closed => "closed",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum StateData {
    Initialized,
    Connecting {
        attempt: ConnectAttempt,
        abort: Arc<AbortHandle>,
    },
    /// Still driven by the attempt that was `Connecting`.
    Loading {
        connection: Arc<Connection>,
        abort: Arc<AbortHandle>,
    },
    Ok {
        connection: Arc<Connection>,
        heartbeat: Option<AbortHandle>,
        recovered: Vec<Error>,
    },
    ConnectionLost {
        cause: Error,
        connection: Arc<Connection>,
    },
    Closed {
        cause: Option<Error>,
    },
}

/// One installed state. `id` increases with every transition.
pub struct State {
    id: u64,
    data: StateData,
}

impl State {
    pub(crate) fn new(id: u64, data: StateData) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> StateKind {
        match &self.data {
            StateData::Initialized => StateKind::Initialized,
            StateData::Connecting { .. } => StateKind::Connecting,
            StateData::Loading { .. } => StateKind::Loading,
            StateData::Ok { .. } => StateKind::Ok,
            StateData::ConnectionLost { .. } => StateKind::ConnectionLost,
            StateData::Closed { .. } => StateKind::Closed,
        }
    }

    /// The connection this state owns or still references.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        match &self.data {
            StateData::Loading { connection, .. }
            | StateData::Ok { connection, .. }
            | StateData::ConnectionLost { connection, .. } => Some(connection),
            _ => None,
        }
    }

    /// Why the handler left its last live state, if it did.
    pub fn cause(&self) -> Option<&Error> {
        match &self.data {
            StateData::ConnectionLost { cause, .. } => Some(cause),
            StateData::Closed { cause } => cause.as_ref(),
            _ => None,
        }
    }

    /// Failures the login that reached `Ok` recovered from.
    pub fn recovered(&self) -> &[Error] {
        match &self.data {
            StateData::Ok { recovered, .. } => recovered,
            _ => &[],
        }
    }

    /// The connect task still running on behalf of this state.
    pub(crate) fn attempt(&self) -> Option<&AbortHandle> {
        match &self.data {
            StateData::Connecting { abort, .. } | StateData::Loading { abort, .. } => Some(abort.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn data(&self) -> &StateData {
        &self.data
    }

    /// Stop what this state owns that `next` does not take over.
    pub(crate) fn release(&self, next: &State) {
        if let StateData::Ok {
            heartbeat: Some(heartbeat),
            ..
        } = &self.data
        {
            heartbeat.abort();
        }

        if let Some(connection) = self.connection() {
            let kept = next
                .connection()
                .is_some_and(|other| Arc::ptr_eq(other, connection));
            if !kept {
                connection.shutdown();
            }
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("State");
        s.field("id", &self.id).field("kind", &self.kind());
        if let Some(connection) = self.connection() {
            s.field("connection", &connection.id());
        }
        if let Some(cause) = self.cause() {
            s.field("cause", &cause.to_string());
        }
        s.finish()
    }
}
