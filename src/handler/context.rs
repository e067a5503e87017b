//! Everything a handler needs, passed in explicitly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ClientConfig, DecodeConfig, HeartbeatConfig};
use crate::crypto::CipherService;
use crate::decode::{CipherPacketCodec, PacketCodec};
use crate::error::{ConfigurationError, Error};
use crate::net::{Connection, SequenceIds, ServerList, Transport};
use crate::observability::{LoggingObserver, StateObserver};
use crate::resilience::RetryBudget;
use crate::sso::{AuthProvider, LoginProtocol, MemorySessionStore, SessionData, SessionStore, SsoProcessor, SsoServices};

/// Work run in `Loading`, after login and before the handler reports `Ok`.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    async fn initialize(&self, connection: &Arc<Connection>, session: &SessionData) -> Result<(), Error>;
}

/// Shared collaborators of one or more handlers.
///
/// Cloning is cheap; clones share the server list, retry budget and
/// sequence counter.
#[derive(Clone)]
pub struct HandlerContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) servers: Arc<ServerList>,
    pub(crate) sso: Arc<SsoProcessor>,
    pub(crate) codec: Arc<dyn PacketCodec>,
    pub(crate) protocol: Arc<dyn LoginProtocol>,
    pub(crate) observer: Arc<dyn StateObserver>,
    pub(crate) initializer: Option<Arc<dyn SessionInitializer>>,
    pub(crate) budget: RetryBudget,
    pub(crate) sequences: Arc<SequenceIds>,
    pub(crate) decode: DecodeConfig,
    pub(crate) heartbeat: HeartbeatConfig,
}

impl HandlerContext {
    pub fn builder(config: ClientConfig) -> HandlerContextBuilder {
        HandlerContextBuilder::new(config)
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub fn servers(&self) -> &ServerList {
        &self.servers
    }

    pub fn sequences(&self) -> &SequenceIds {
        &self.sequences
    }

    pub fn protocol(&self) -> &Arc<dyn LoginProtocol> {
        &self.protocol
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("servers", &self.servers.addresses())
            .field("budget_remaining", &self.budget.remaining())
            .field("decode", &self.decode)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Assembles a [`HandlerContext`] from a [`ClientConfig`] and the embedder's
/// collaborators.
pub struct HandlerContextBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    protocol: Option<Arc<dyn LoginProtocol>>,
    cipher: Option<Arc<dyn CipherService>>,
    provider: Option<Arc<dyn AuthProvider>>,
    codec: Option<Arc<dyn PacketCodec>>,
    store: Option<Arc<dyn SessionStore>>,
    observer: Option<Arc<dyn StateObserver>>,
    initializer: Option<Arc<dyn SessionInitializer>>,
    budget: Option<RetryBudget>,
}

impl HandlerContextBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            protocol: None,
            cipher: None,
            provider: None,
            codec: None,
            store: None,
            observer: None,
            initializer: None,
            budget: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn protocol(mut self, protocol: Arc<dyn LoginProtocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn CipherService>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Defaults to a [`CipherPacketCodec`] over the configured cipher.
    pub fn codec(mut self, codec: Arc<dyn PacketCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Defaults to a [`MemorySessionStore`].
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`LoggingObserver`].
    pub fn observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn initializer(mut self, initializer: Arc<dyn SessionInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Defaults to `retries.max_attempts` from the config.
    pub fn budget(mut self, budget: RetryBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn build(self) -> Result<HandlerContext, ConfigurationError> {
        let transport = required(self.transport, "transport")?;
        let protocol = required(self.protocol, "protocol")?;
        let cipher = required(self.cipher, "cipher")?;
        let provider = required(self.provider, "auth provider")?;

        let servers = Arc::new(ServerList::new(self.config.servers.clone())?);
        let sequences = Arc::new(SequenceIds::default());
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(CipherPacketCodec::new(Arc::clone(&cipher))));

        let sso = SsoProcessor::new(SsoServices {
            protocol: Arc::clone(&protocol),
            cipher,
            provider,
            store: self.store.unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            sequences: Arc::clone(&sequences),
            config: self.config.sso.clone(),
        })?;

        Ok(HandlerContext {
            transport,
            servers,
            sso: Arc::new(sso),
            codec,
            protocol,
            observer: self.observer.unwrap_or_else(|| Arc::new(LoggingObserver)),
            initializer: self.initializer,
            budget: self
                .budget
                .unwrap_or_else(|| RetryBudget::new(self.config.retries.max_attempts)),
            sequences,
            decode: self.config.decode.clone(),
            heartbeat: self.config.heartbeat.clone(),
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ConfigurationError> {
    value.ok_or_else(|| ConfigurationError::Invalid(format!("{name} is required")))
}
