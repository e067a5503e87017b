//! Shared utilities for integration testing.
//!
//! An in-memory transport wired to a scripted server, a text login protocol
//! and an XOR cipher. Server replies are always encrypted, so every reply
//! also exercises the installed session secret.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use im_link::config::ClientConfig;
use im_link::crypto::{CipherError, CipherService, SessionKeys, SharedSecret};
use im_link::error::{AuthError, Error, TransportError};
use im_link::handler::{HandlerContext, HandlerContextBuilder, SessionInitializer};
use im_link::net::frame::decode_frame;
use im_link::net::{Channel, Connection, IncomingPacket, InboundSink, OutgoingPacket, RawIncomingPacket, ServerAddress, Transport};
use im_link::sso::{
    AuthProvider, Challenge, ConnectionInfo, Credentials, LoginProtocol, LoginResponse, MemorySessionStore, SessionData,
    VerificationAnswer,
};
use im_link::StateKind;

pub const ACCOUNT: &str = "alice";
pub const PASSWORD: &str = "correct horse";
pub const SMS_CODE: &str = "1234";
pub const KEY: &[u8] = b"k3y";

pub fn token_for(account: &str) -> Bytes {
    Bytes::from(format!("token-{account}"))
}

fn xor(key: &[u8], data: &[u8]) -> Vec<u8> {
    data.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k).collect()
}

/// Symmetric XOR cipher with a fixed key.
#[derive(Debug, Default)]
pub struct XorCipher;

impl CipherService for XorCipher {
    fn derive_shared_secret(&self) -> Result<SharedSecret, CipherError> {
        Ok(SharedSecret::new(Bytes::from_static(KEY)))
    }

    fn encrypt(&self, secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(xor(secret.as_bytes(), plaintext))
    }

    fn decrypt(&self, secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(xor(secret.as_bytes(), ciphertext))
    }
}

/// Plain-text login protocol understood by [`MockServer`].
///
/// Replies: `ok:<account>:<token>`, `verify:sms:<phone>`,
/// `rejected:<message>`, `later:<message>`.
#[derive(Debug, Default)]
pub struct TextProtocol;

impl LoginProtocol for TextProtocol {
    fn resume_session(&self, _keys: &SessionKeys, session: &SessionData, sequence: u32) -> Result<OutgoingPacket, Error> {
        let body = format!("{}:{}", session.account, String::from_utf8_lossy(&session.token));
        Ok(OutgoingPacket::new("login.resume", sequence, body.as_bytes()))
    }

    fn password_login(
        &self,
        _keys: &SessionKeys,
        credentials: &Credentials,
        sequence: u32,
    ) -> Result<OutgoingPacket, Error> {
        let body = format!("{}:{}", credentials.account, credentials.password);
        Ok(OutgoingPacket::new("login.password", sequence, body.as_bytes()))
    }

    fn submit_verification(
        &self,
        _keys: &SessionKeys,
        _challenge: &Challenge,
        answer: &VerificationAnswer,
        sequence: u32,
    ) -> Result<OutgoingPacket, Error> {
        let body = match answer {
            VerificationAnswer::Code(code) | VerificationAnswer::Ticket(code) => code.clone(),
            VerificationAnswer::Confirmed => "confirmed".to_string(),
        };
        Ok(OutgoingPacket::new("login.verify", sequence, body.as_bytes()))
    }

    fn register_session(&self, session: &SessionData, sequence: u32) -> Result<OutgoingPacket, Error> {
        Ok(OutgoingPacket::new("register", sequence, session.account.as_bytes()))
    }

    fn heartbeat(&self, sequence: u32) -> Option<OutgoingPacket> {
        Some(OutgoingPacket::new("heartbeat", sequence, b""))
    }

    fn parse_login_response(&self, packet: &IncomingPacket) -> Result<LoginResponse, Error> {
        let body = String::from_utf8_lossy(&packet.body).into_owned();
        let mut parts = body.splitn(3, ':');
        let response = match (parts.next(), parts.next(), parts.next()) {
            (Some("ok"), Some(account), Some(token)) => LoginResponse::Success(SessionData {
                account: account.to_string(),
                token: Bytes::from(token.to_string()),
            }),
            (Some("verify"), Some("sms"), Some(phone)) => {
                LoginResponse::NeedsVerification(Challenge::SmsCode { phone: phone.to_string() })
            }
            (Some("rejected"), Some(message), _) => LoginResponse::Rejected {
                message: message.to_string(),
            },
            (Some("later"), Some(message), _) => LoginResponse::RetryLater {
                message: message.to_string(),
            },
            _ => return Err(AuthError::Protocol(format!("unexpected login reply {body:?}")).into()),
        };
        Ok(response)
    }

    fn parse_register_response(&self, packet: &IncomingPacket) -> Result<(), Error> {
        match &packet.body[..] {
            b"ok" => Ok(()),
            other => Err(AuthError::Protocol(format!("register refused: {}", String::from_utf8_lossy(other))).into()),
        }
    }

    fn forced_offline_reason(&self, packet: &IncomingPacket) -> Option<String> {
        (packet.command == "push.kick").then(|| String::from_utf8_lossy(&packet.body).into_owned())
    }
}

/// Scripted server behind [`MemoryTransport`].
#[derive(Debug)]
pub struct MockServer {
    password: String,
    challenges: Mutex<VecDeque<Challenge>>,
    answer_heartbeats: AtomicBool,
    answer_register: AtomicBool,
    retry_later: AtomicU32,
    received: Mutex<Vec<String>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            password: PASSWORD.to_string(),
            challenges: Mutex::new(VecDeque::new()),
            answer_heartbeats: AtomicBool::new(true),
            answer_register: AtomicBool::new(true),
            retry_later: AtomicU32::new(0),
            received: Mutex::new(Vec::new()),
        }
    }
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask for an SMS code after the next correct password.
    pub fn challenge_with_sms(&self) {
        self.challenges.lock().unwrap().push_back(Challenge::SmsCode { phone: "555".into() });
    }

    pub fn stop_answering_heartbeats(&self) {
        self.answer_heartbeats.store(false, Ordering::SeqCst);
    }

    pub fn refuse_register(&self) {
        self.answer_register.store(false, Ordering::SeqCst);
    }

    /// Answer the next `n` password logins with "retry later".
    pub fn throttle(&self, n: u32) {
        self.retry_later.store(n, Ordering::SeqCst);
    }

    /// Commands received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.received().iter().filter(|c| c.as_str() == command).count()
    }

    fn handle(&self, command: &str, body: &str) -> Option<String> {
        self.received.lock().unwrap().push(command.to_string());
        match command {
            "login.resume" => Some(match body.split_once(':') {
                Some((account, token)) if token_for(account) == token.as_bytes() => self.success(account),
                _ => "rejected:session expired".to_string(),
            }),
            "login.password" => Some(match body.split_once(':') {
                Some((account, password)) if password == self.password => {
                    if self.take_throttle() {
                        "later:too many logins".to_string()
                    } else {
                        self.next_challenge().unwrap_or_else(|| self.success(account))
                    }
                }
                _ => "rejected:wrong password".to_string(),
            }),
            "login.verify" => Some(if body == SMS_CODE {
                self.next_challenge().unwrap_or_else(|| self.success(ACCOUNT))
            } else {
                "rejected:wrong code".to_string()
            }),
            "register" => Some(if self.answer_register.load(Ordering::SeqCst) {
                "ok".to_string()
            } else {
                "denied".to_string()
            }),
            "heartbeat" => self.answer_heartbeats.load(Ordering::SeqCst).then(|| "ok".to_string()),
            _ => None,
        }
    }

    fn success(&self, account: &str) -> String {
        format!("ok:{account}:{}", String::from_utf8_lossy(&token_for(account)))
    }

    fn next_challenge(&self) -> Option<String> {
        match self.challenges.lock().unwrap().pop_front() {
            Some(Challenge::SmsCode { phone }) => Some(format!("verify:sms:{phone}")),
            Some(_) | None => None,
        }
    }

    fn take_throttle(&self) -> bool {
        self.retry_later
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Write half of an in-memory connection.
pub struct MemoryChannel {
    server: Arc<MockServer>,
    sink: InboundSink,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Deliver a server-initiated packet.
    pub async fn push(&self, command: &str, body: &str) {
        let raw = RawIncomingPacket {
            command: command.to_string(),
            sequence: 0,
            payload: Bytes::from(xor(KEY, body.as_bytes())),
        };
        let _ = self.sink.deliver(raw).await;
    }

    /// Simulate the peer going away.
    pub fn drop_connection(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sink.disconnected(TransportError::Disconnected);
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let request = decode_frame(bytes).map_err(|e| TransportError::Io(Arc::new(io::Error::other(e.to_string()))))?;
        let body = String::from_utf8_lossy(&request.payload).into_owned();

        if let Some(reply) = self.server.handle(&request.command, &body) {
            let raw = RawIncomingPacket {
                command: request.command,
                sequence: request.sequence,
                payload: Bytes::from(xor(KEY, reply.as_bytes())),
            };
            let _ = self.sink.deliver(raw).await;
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transport that connects every address to the same [`MockServer`].
pub struct MemoryTransport {
    server: Arc<MockServer>,
    refuse: AtomicU32,
    connects: AtomicU32,
    delay: Mutex<Option<Duration>>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
}

impl MemoryTransport {
    pub fn new(server: Arc<MockServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            refuse: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            delay: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
        })
    }

    /// Refuse the next `n` connects.
    pub fn refuse(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Hold every connect for `delay` before it completes.
    pub fn delay_connects(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_channel(&self) -> Arc<MemoryChannel> {
        self.channels.lock().unwrap().last().cloned().expect("no connection opened")
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &ServerAddress, sink: InboundSink) -> Result<Arc<dyn Channel>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                address: address.to_string(),
                source: Arc::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            });
        }

        let channel = Arc::new(MemoryChannel {
            server: Arc::clone(&self.server),
            sink,
            closed: AtomicBool::new(false),
        });
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        Ok(channel as Arc<dyn Channel>)
    }
}

/// Hands out passwords in order, repeating the last; answers challenges
/// with [`SMS_CODE`].
pub struct ScriptedProvider {
    passwords: Mutex<VecDeque<String>>,
    attempts: Mutex<Vec<u32>>,
    solved: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(passwords: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            passwords: Mutex::new(passwords.iter().map(|p| p.to_string()).collect()),
            attempts: Mutex::new(Vec::new()),
            solved: AtomicU32::new(0),
        })
    }

    pub fn correct() -> Arc<Self> {
        Self::new(&[PASSWORD])
    }

    /// Attempt numbers passed to `credentials`, in call order.
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn solved(&self) -> u32 {
        self.solved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for ScriptedProvider {
    async fn credentials(&self, _info: &ConnectionInfo, attempt: u32) -> Result<Credentials, AuthError> {
        self.attempts.lock().unwrap().push(attempt);
        let mut passwords = self.passwords.lock().unwrap();
        let password = if passwords.len() > 1 {
            passwords.pop_front()
        } else {
            passwords.front().cloned()
        };
        password
            .map(|p| Credentials::new(ACCOUNT, p))
            .ok_or_else(|| AuthError::Rejected {
                message: "no credentials".into(),
            })
    }

    async fn solve(&self, _info: &ConnectionInfo, challenge: &Challenge) -> Result<VerificationAnswer, AuthError> {
        self.solved.fetch_add(1, Ordering::SeqCst);
        // a human would take a while
        tokio::time::sleep(Duration::from_millis(50)).await;
        match challenge {
            Challenge::SmsCode { .. } => Ok(VerificationAnswer::Code(SMS_CODE.to_string())),
            other => Err(AuthError::VerificationRequired(other.kind().to_string())),
        }
    }
}

/// Post-login initialization that always fails.
pub struct FailingInitializer;

#[async_trait]
impl SessionInitializer for FailingInitializer {
    async fn initialize(&self, _connection: &Arc<Connection>, _session: &SessionData) -> Result<(), Error> {
        Err(Error::Authentication(AuthError::Protocol("contact sync failed".into())))
    }
}

/// Post-login initialization that never completes.
#[derive(Default)]
pub struct StalledInitializer {
    started: AtomicU32,
}

impl StalledInitializer {
    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionInitializer for StalledInitializer {
    async fn initialize(&self, _connection: &Arc<Connection>, _session: &SessionData) -> Result<(), Error> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.servers = vec![ServerAddress::new("im.example.test", 8080)];
    config.sso.response_timeout_secs = 1;
    config.heartbeat.enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config
}

/// Everything a test needs to poke at.
pub struct Harness {
    pub server: Arc<MockServer>,
    pub transport: Arc<MemoryTransport>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<MemorySessionStore>,
    pub context: HandlerContext,
}

pub fn harness(config: ClientConfig, provider: Arc<ScriptedProvider>, store: MemorySessionStore) -> Harness {
    harness_with(config, provider, store, |builder| builder)
}

pub fn harness_with(
    config: ClientConfig,
    provider: Arc<ScriptedProvider>,
    store: MemorySessionStore,
    customize: impl FnOnce(HandlerContextBuilder) -> HandlerContextBuilder,
) -> Harness {
    let server = MockServer::new();
    let transport = MemoryTransport::new(Arc::clone(&server));
    let store = Arc::new(store);
    let builder = HandlerContext::builder(config)
        .transport(transport.clone())
        .protocol(Arc::new(TextProtocol))
        .cipher(Arc::new(XorCipher))
        .auth_provider(provider.clone())
        .session_store(store.clone());
    let context = customize(builder).build().expect("valid handler context");
    Harness {
        server,
        transport,
        provider,
        store,
        context,
    }
}

pub fn default_harness() -> Harness {
    harness(test_config(), ScriptedProvider::correct(), MemorySessionStore::new())
}

pub fn cached_session() -> SessionData {
    SessionData {
        account: ACCOUNT.to_string(),
        token: token_for(ACCOUNT),
    }
}

pub fn stale_session() -> SessionData {
    SessionData {
        account: ACCOUNT.to_string(),
        token: Bytes::from_static(b"expired"),
    }
}

/// Wait until the handler reports `kind`.
pub async fn wait_for_state(handler: &im_link::NetworkHandler, kind: StateKind) {
    let mut changes = handler.state_changes();
    tokio::time::timeout(Duration::from_secs(120), changes.wait_for(|k| *k == kind))
        .await
        .expect("state change timed out")
        .expect("handler dropped");
}

