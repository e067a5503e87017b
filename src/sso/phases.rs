//! The phases of the login handshake.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SsoConfig;
use crate::crypto::{CipherService, SessionKeys};
use crate::error::{AuthError, Error};
use crate::net::{Connection, IncomingPacket, OutgoingPacket, SequenceIds};
use crate::observability::metrics;
use crate::pipeline::{AttributeKey, ExecutionOutcome, Finally, Phase, PipelineContext, SavepointId};
use crate::sso::protocol::{LoginProtocol, LoginResponse};
use crate::sso::provider::{AuthProvider, ConnectionInfo, Credentials};
use crate::sso::session::{SessionData, SessionStore};

/// Rewind target for a rejected or failed credential round.
pub const CREDENTIALS: SavepointId = SavepointId(1);

pub const SESSION_KEYS: AttributeKey<SessionKeys> = AttributeKey::new("session_keys");
pub const CREDENTIALS_IN_USE: AttributeKey<Credentials> = AttributeKey::new("credentials");
pub const LOGIN_METHOD: AttributeKey<&'static str> = AttributeKey::new("login_method");

/// Collaborators shared by every login.
pub struct SsoServices {
    pub protocol: Arc<dyn LoginProtocol>,
    pub cipher: Arc<dyn CipherService>,
    pub provider: Arc<dyn AuthProvider>,
    pub store: Arc<dyn SessionStore>,
    pub sequences: Arc<SequenceIds>,
    pub config: SsoConfig,
}

impl SsoServices {
    async fn request(&self, connection: &Connection, packet: &OutgoingPacket) -> Result<IncomingPacket, Error> {
        connection
            .send_and_expect(packet, self.config.response_timeout())
            .await
    }
}

/// Per-login data carried by the pipeline context.
pub struct LoginContext {
    pub connection: Arc<Connection>,
    pub info: ConnectionInfo,
    pub services: Arc<SsoServices>,
    pub password_attempts: u32,
    pub verification_rounds: u32,
}

impl LoginContext {
    pub fn new(connection: Arc<Connection>, services: Arc<SsoServices>) -> Self {
        let info = ConnectionInfo {
            connection: connection.id(),
            address: connection.address().clone(),
        };
        Self {
            connection,
            info,
            services,
            password_attempts: 0,
            verification_rounds: 0,
        }
    }
}

type Ctx = PipelineContext<LoginContext, Error>;

fn handles(ctx: &Ctx) -> (Arc<Connection>, Arc<SsoServices>) {
    (Arc::clone(&ctx.data().connection), Arc::clone(&ctx.data().services))
}

/// Derives the session secret and installs it on the connection.
pub struct EstablishKeyExchange;

#[async_trait]
impl Phase<LoginContext, Error> for EstablishKeyExchange {
    type Input = ();
    type Output = SessionKeys;

    fn name(&self) -> &str {
        "EstablishKeyExchange"
    }

    async fn run(&self, ctx: &mut Ctx, _input: ()) -> Result<SessionKeys, Error> {
        let (connection, services) = handles(ctx);
        let secret = services
            .cipher
            .derive_shared_secret()
            .map_err(|e| AuthError::KeyExchange(e.0))?;

        connection.install_secret(secret.clone());
        let keys = SessionKeys::new(secret);
        ctx.attributes_mut().insert(&SESSION_KEYS, keys.clone());

        tracing::debug!(connection_id = %connection.id(), "Session secret installed");
        Ok(keys)
    }
}

/// Fast login from the cached session.
///
/// A refused session is dropped from the store so later rounds go straight
/// to password login.
pub struct ResumeSession;

#[async_trait]
impl Phase<LoginContext, Error> for ResumeSession {
    type Input = SessionKeys;
    type Output = LoginResponse;

    fn name(&self) -> &str {
        "ResumeSession"
    }

    async fn run(&self, ctx: &mut Ctx, keys: SessionKeys) -> Result<LoginResponse, Error> {
        let (connection, services) = handles(ctx);
        let session = services.store.load().ok_or(AuthError::NoCachedSession)?;

        let packet = services
            .protocol
            .resume_session(&keys, &session, services.sequences.next())?;
        let response = services.request(&connection, &packet).await?;

        match services.protocol.parse_login_response(&response)? {
            LoginResponse::Success(session) => {
                ctx.attributes_mut().insert(&LOGIN_METHOD, "resume");
                Ok(LoginResponse::Success(session))
            }
            other => {
                tracing::info!(account = %session.account, response = ?other, "Cached session refused");
                services.store.invalidate();
                Err(AuthError::Rejected {
                    message: "cached session refused".into(),
                }
                .into())
            }
        }
    }
}

/// Password login with credentials from the [`AuthProvider`].
pub struct PasswordLogin;

#[async_trait]
impl Phase<LoginContext, Error> for PasswordLogin {
    type Input = SessionKeys;
    type Output = LoginResponse;

    fn name(&self) -> &str {
        "PasswordLogin"
    }

    async fn run(&self, ctx: &mut Ctx, keys: SessionKeys) -> Result<LoginResponse, Error> {
        let (connection, services) = handles(ctx);
        ctx.data_mut().password_attempts += 1;
        let attempt = ctx.data().password_attempts;

        let credentials = services.provider.credentials(&ctx.data().info, attempt).await?;
        let packet = services
            .protocol
            .password_login(&keys, &credentials, services.sequences.next())?;
        tracing::debug!(account = %credentials.account, attempt, "Submitting password login");

        ctx.attributes_mut().insert(&CREDENTIALS_IN_USE, credentials);
        ctx.attributes_mut().insert(&LOGIN_METHOD, "password");

        let response = services.request(&connection, &packet).await?;
        services.protocol.parse_login_response(&response)
    }
}

/// Follows the server through verification challenges until it accepts or
/// refuses the login.
pub struct InterpretServerChallenge;

#[async_trait]
impl Phase<LoginContext, Error> for InterpretServerChallenge {
    type Input = LoginResponse;
    type Output = SessionData;

    fn name(&self) -> &str {
        "InterpretServerChallenge"
    }

    async fn run(&self, ctx: &mut Ctx, response: LoginResponse) -> Result<SessionData, Error> {
        let (connection, services) = handles(ctx);
        let keys = ctx.attributes().require(&SESSION_KEYS)?.clone();
        let max_rounds = services.config.max_verification_rounds;
        let mut response = response;

        loop {
            match response {
                LoginResponse::Success(session) => return Ok(session),
                LoginResponse::Rejected { message } => {
                    tracing::warn!(message = %message, "Login rejected");
                    return Err(AuthError::Rejected { message }.into());
                }
                LoginResponse::RetryLater { message } => {
                    return Err(AuthError::RetryLater { message }.into());
                }
                LoginResponse::NeedsVerification(challenge) => {
                    ctx.data_mut().verification_rounds += 1;
                    let round = ctx.data().verification_rounds;
                    if round > max_rounds {
                        return Err(AuthError::TooManyVerificationRounds(max_rounds).into());
                    }
                    tracing::info!(kind = challenge.kind(), round, "Server requested verification");

                    let answer = services.provider.solve(&ctx.data().info, &challenge).await?;
                    let packet = services.protocol.submit_verification(
                        &keys,
                        &challenge,
                        &answer,
                        services.sequences.next(),
                    )?;
                    let reply = services.request(&connection, &packet).await?;
                    response = services.protocol.parse_login_response(&reply)?;
                }
            }
        }
    }
}

/// Registers the client online and caches the session.
pub struct RegisterSession;

#[async_trait]
impl Phase<LoginContext, Error> for RegisterSession {
    type Input = SessionData;
    type Output = SessionData;

    fn name(&self) -> &str {
        "RegisterSession"
    }

    async fn run(&self, ctx: &mut Ctx, session: SessionData) -> Result<SessionData, Error> {
        let (connection, services) = handles(ctx);
        let packet = services
            .protocol
            .register_session(&session, services.sequences.next())?;
        let reply = services.request(&connection, &packet).await?;
        services.protocol.parse_register_response(&reply)?;

        services.store.save(&session);
        tracing::info!(account = %session.account, connection_id = %connection.id(), "Registered online");
        Ok(session)
    }
}

pub struct LogLoginOutcome;

#[async_trait]
impl Finally<LoginContext, Error> for LogLoginOutcome {
    fn name(&self) -> &str {
        "LogLoginOutcome"
    }

    async fn run(&self, ctx: &mut Ctx) -> Result<(), Error> {
        let method = ctx.attributes().get(&LOGIN_METHOD).copied().unwrap_or("none");
        let failures = ctx.collector().len();
        match ctx.outcome() {
            Some(ExecutionOutcome::Succeeded) => {
                metrics::record_login_attempt("success");
                tracing::info!(method, failures, "Login succeeded");
            }
            _ => {
                metrics::record_login_attempt("failure");
                tracing::warn!(
                    method,
                    failures,
                    last_phase = ctx.last_phase().unwrap_or("none"),
                    "Login failed"
                );
            }
        }
        Ok(())
    }
}

/// Drops the credentials from the context however the login ended.
pub struct ClearCredentials;

#[async_trait]
impl Finally<LoginContext, Error> for ClearCredentials {
    fn name(&self) -> &str {
        "ClearCredentials"
    }

    async fn run(&self, ctx: &mut Ctx) -> Result<(), Error> {
        ctx.attributes_mut().remove(&CREDENTIALS_IN_USE);
        Ok(())
    }
}
