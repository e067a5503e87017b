//! Login handshake.
//!
//! # Data Flow
//! ```text
//! EstablishKeyExchange        () → SessionKeys
//! ── savepoint CREDENTIALS ──
//! SubmitCredentials           ResumeSession, falling back to PasswordLogin
//! InterpretServerChallenge    verification rounds; on failure rewind to CREDENTIALS
//! RegisterSession             → SessionData
//! ── finish ──
//! finally LogLoginOutcome, ClearCredentials
//! ```
//!
//! Packet layouts come from a [`LoginProtocol`]; credentials and
//! verification answers from an [`AuthProvider`].

pub mod phases;
pub mod processor;
pub mod protocol;
pub mod provider;
pub mod session;

pub use phases::{LoginContext, SsoServices};
pub use processor::{LoginOutcome, SsoProcessor};
pub use protocol::{LoginProtocol, LoginResponse};
pub use provider::{AuthProvider, Challenge, ConnectionInfo, Credentials, StaticCredentials, VerificationAnswer};
pub use session::{MemorySessionStore, SessionData, SessionStore};
