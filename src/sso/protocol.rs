//! Login packet construction and response parsing.
//!
//! Field layouts are protocol-specific and supplied by the embedder; the
//! handshake only needs these operations.

use crate::crypto::SessionKeys;
use crate::error::Error;
use crate::net::{IncomingPacket, OutgoingPacket};
use crate::sso::provider::{Challenge, Credentials, VerificationAnswer};
use crate::sso::session::SessionData;

/// The server's verdict on a login or verification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    Success(SessionData),
    NeedsVerification(Challenge),
    Rejected { message: String },
    RetryLater { message: String },
}

/// Builds and parses the packets of the authentication handshake.
pub trait LoginProtocol: Send + Sync {
    /// Fast login with a cached session.
    fn resume_session(&self, keys: &SessionKeys, session: &SessionData, sequence: u32) -> Result<OutgoingPacket, Error>;

    fn password_login(
        &self,
        keys: &SessionKeys,
        credentials: &Credentials,
        sequence: u32,
    ) -> Result<OutgoingPacket, Error>;

    fn submit_verification(
        &self,
        keys: &SessionKeys,
        challenge: &Challenge,
        answer: &VerificationAnswer,
        sequence: u32,
    ) -> Result<OutgoingPacket, Error>;

    /// Announce the client as online for `session`.
    fn register_session(&self, session: &SessionData, sequence: u32) -> Result<OutgoingPacket, Error>;

    /// `None` if the protocol has no heartbeat.
    fn heartbeat(&self, sequence: u32) -> Option<OutgoingPacket>;

    fn parse_login_response(&self, packet: &IncomingPacket) -> Result<LoginResponse, Error>;

    fn parse_register_response(&self, packet: &IncomingPacket) -> Result<(), Error>;

    /// If `packet` is a server-initiated kick, the reason given.
    fn forced_offline_reason(&self, _packet: &IncomingPacket) -> Option<String> {
        None
    }
}
