//! Credential and verification callbacks supplied by the embedder.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AuthError;
use crate::net::{ConnectionId, ServerAddress};

/// Account credentials for a password login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the provider is told about the connection being authenticated.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection: ConnectionId,
    pub address: ServerAddress,
}

/// A verification step the server demands before accepting the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Type the text shown in `image`.
    PictureCaptcha { image: Bytes },
    /// Complete the slider at `url` and submit the ticket it yields.
    Slider { url: String },
    /// Confirm the login from a trusted device via `url`.
    UnsafeDevice { url: String },
    /// Approve the new device from an already logged-in one.
    DeviceLock { hint: String },
    /// Enter the code sent to `phone`.
    SmsCode { phone: String },
}

impl Challenge {
    pub fn kind(&self) -> &'static str {
        match self {
            Challenge::PictureCaptcha { .. } => "picture_captcha",
            Challenge::Slider { .. } => "slider",
            Challenge::UnsafeDevice { .. } => "unsafe_device",
            Challenge::DeviceLock { .. } => "device_lock",
            Challenge::SmsCode { .. } => "sms_code",
        }
    }
}

/// The embedder's answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationAnswer {
    /// Captcha text or SMS code.
    Code(String),
    /// Ticket from a slider or device confirmation page.
    Ticket(String),
    /// The user confirmed out of band.
    Confirmed,
}

/// Supplies credentials and solves verification challenges.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Credentials for password login attempt `attempt` (1-based). Called
    /// again after a rejection so interactive providers can re-prompt.
    async fn credentials(&self, info: &ConnectionInfo, attempt: u32) -> Result<Credentials, AuthError>;

    /// Solve `challenge`. This may wait on a human indefinitely.
    async fn solve(&self, info: &ConnectionInfo, challenge: &Challenge) -> Result<VerificationAnswer, AuthError>;
}

/// Fixed credentials; cannot solve challenges.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthProvider for StaticCredentials {
    async fn credentials(&self, _info: &ConnectionInfo, _attempt: u32) -> Result<Credentials, AuthError> {
        Ok(self.credentials.clone())
    }

    async fn solve(&self, _info: &ConnectionInfo, challenge: &Challenge) -> Result<VerificationAnswer, AuthError> {
        Err(AuthError::VerificationRequired(format!(
            "{} challenge needs an interactive provider",
            challenge.kind()
        )))
    }
}
