//! Error types shared across the client.
//!
//! Every error is `Clone`: a single terminal cause is handed to every caller
//! waiting on the same connect attempt, and `Closed` rethrows it on each
//! subsequent `resume_connection`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::SavepointId;

/// Result alias for handler-level operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure in the byte transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("transport I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("connection closed by peer")]
    Disconnected,

    #[error("channel is closed")]
    ChannelClosed,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

/// Failure turning raw bytes into a packet.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("failed to decrypt `{command}`: {reason}")]
    Decrypt { command: String, reason: String },

    #[error("decode queue is full")]
    QueueFull,

    #[error("decode pipeline is shut down")]
    PipelineClosed,
}

/// Failure in the authentication handshake.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("login rejected: {message}")]
    Rejected { message: String },

    #[error("server asked to retry later: {message}")]
    RetryLater { message: String },

    #[error("verification required but could not be completed: {0}")]
    VerificationRequired(String),

    #[error("no cached session to resume")]
    NoCachedSession,

    #[error("gave up after {0} verification rounds")]
    TooManyVerificationRounds(u32),

    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    #[error("unexpected login response: {0}")]
    Protocol(String),
}

impl AuthError {
    /// Whether a fresh connection might succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::RetryLater { .. })
    }
}

/// An invalid pipeline graph or client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("pipeline declares no Finally node")]
    MissingFinally,

    #[error("pipeline declares no Finish node")]
    MissingFinish,

    #[error("pipeline declares more than one Finish node")]
    DuplicateFinish,

    #[error("savepoint {0} is declared more than once")]
    DuplicateSavepoint(SavepointId),

    #[error("jump target {0} is not a savepoint declared before the jump")]
    UnknownJumpTarget(SavepointId),

    #[error("`{0}` is unreachable after Finish")]
    UnreachableNode(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure raised by the phase engine itself rather than by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("value threaded into `{node}` has an unexpected type")]
    TypeMismatch { node: String },

    #[error("required attribute `{0}` is missing")]
    MissingAttribute(&'static str),

    #[error("execution ran past the last node without reaching Finish")]
    Unterminated,
}

/// An error together with the earlier failures it superseded.
#[derive(Debug, Clone)]
pub struct Suppressed<E> {
    error: E,
    suppressed: Vec<E>,
}

impl<E> Suppressed<E> {
    pub fn new(error: E, suppressed: Vec<E>) -> Self {
        Self { error, suppressed }
    }

    /// The failure that ended the operation.
    pub fn error(&self) -> &E {
        &self.error
    }

    /// Earlier failures, oldest first.
    pub fn suppressed(&self) -> &[E] {
        &self.suppressed
    }

    pub fn into_parts(self) -> (E, Vec<E>) {
        (self.error, self.suppressed)
    }
}

impl<E: fmt::Display> fmt::Display for Suppressed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} earlier failures suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Suppressed<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Top-level client error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("forced offline by server: {reason}")]
    ForcedDisconnect { reason: String },

    #[error("heartbeat failed: {0}")]
    HeartbeatFailed(Box<Error>),

    #[error("network handler is not connected; call resume_connection first")]
    NotConnected,

    #[error("connection lost ({0}); call resume_connection to reconnect")]
    ConnectionLost(Box<Error>),

    #[error("network handler is closed{}", .0.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    Closed(Option<Box<Error>>),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("no response to `{command}` (seq {sequence}) within {timeout:?}")]
    Timeout {
        command: String,
        sequence: u32,
        timeout: Duration,
    },

    #[error("retry budget of {0} attempts exhausted")]
    RetryBudgetExhausted(u32),

    #[error(transparent)]
    Suppressed(Box<Suppressed<Error>>),
}

impl Error {
    /// Collapse a collected failure: a lone error stays itself, otherwise the
    /// suppressed history is kept alongside it.
    pub fn from_collected(collected: Suppressed<Error>) -> Self {
        if collected.suppressed().is_empty() {
            collected.error
        } else {
            Error::Suppressed(Box::new(collected))
        }
    }

    /// The error that ended the operation, looking through suppression.
    pub fn primary(&self) -> &Error {
        match self {
            Error::Suppressed(s) => s.error().primary(),
            other => other,
        }
    }

    /// Whether replacing the handler and reconnecting may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Transport(_)
            | Error::ForcedDisconnect { .. }
            | Error::HeartbeatFailed(_)
            | Error::ConnectionLost(_)
            | Error::Timeout { .. } => true,
            Error::Authentication(e) => e.is_recoverable(),
            Error::Closed(Some(cause)) => cause.is_recoverable(),
            Error::Suppressed(s) => s.error().is_recoverable(),
            _ => false,
        }
    }

    /// Whether this failure came from `close` or an aborted task.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.primary(), Error::Cancelled(_))
    }
}

impl From<Suppressed<Error>> for Error {
    fn from(collected: Suppressed<Error>) -> Self {
        Error::from_collected(collected)
    }
}
