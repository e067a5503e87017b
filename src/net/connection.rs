//! A live connection and the per-connection resources it owns.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Own the channel, decode pipeline, response listeners and session secret
//! - Tear all of them down together

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::crypto::SharedSecret;
use crate::decode::DecodePipeline;
use crate::error::{Error, TransportError};
use crate::net::listeners::{PacketListeners, ResponseListener};
use crate::net::packet::{IncomingPacket, OutgoingPacket};
use crate::net::server_list::ServerAddress;
use crate::net::transport::Channel;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An open transport plus everything scoped to it.
///
/// Dropping the connection shuts it down.
pub struct Connection {
    id: ConnectionId,
    address: ServerAddress,
    channel: Arc<dyn Channel>,
    pipeline: DecodePipeline,
    listeners: Arc<PacketListeners>,
    secret: Arc<ArcSwapOption<SharedSecret>>,
}

impl Connection {
    /// Assemble a connection from parts that were wired together by the
    /// caller. `secret` and `listeners` must be the ones the pipeline's
    /// codec and dispatcher were built with.
    pub fn new(
        id: ConnectionId,
        address: ServerAddress,
        channel: Arc<dyn Channel>,
        pipeline: DecodePipeline,
        listeners: Arc<PacketListeners>,
        secret: Arc<ArcSwapOption<SharedSecret>>,
    ) -> Self {
        Self {
            id,
            address,
            channel,
            pipeline,
            listeners,
            secret,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub async fn send(&self, packet: &OutgoingPacket) -> Result<(), TransportError> {
        tracing::trace!(
            connection_id = %self.id,
            command = %packet.command,
            sequence = packet.sequence,
            "Sending packet"
        );
        self.channel.send(packet.bytes.clone()).await?;
        metrics::record_packet_sent();
        Ok(())
    }

    /// Register interest in the response to `command`/`sequence`.
    pub fn listen(&self, command: &str, sequence: u32) -> ResponseListener {
        self.listeners.register(command, sequence)
    }

    /// Send `packet` once and wait up to `timeout` for its response.
    pub async fn send_and_expect(&self, packet: &OutgoingPacket, timeout: Duration) -> Result<IncomingPacket, Error> {
        let mut listener = self.listen(&packet.command, packet.sequence);
        self.send(packet).await?;
        match tokio::time::timeout(timeout, listener.recv()).await {
            Ok(response) => response,
            Err(_) => Err(Error::Timeout {
                command: packet.command.clone(),
                sequence: packet.sequence,
                timeout,
            }),
        }
    }

    /// Make the decode pipeline decrypt with `secret` from now on.
    pub fn install_secret(&self, secret: SharedSecret) {
        self.secret.store(Some(Arc::new(secret)));
    }

    pub fn secret(&self) -> Option<Arc<SharedSecret>> {
        self.secret.load_full()
    }

    pub fn decode_failures(&self) -> u64 {
        self.pipeline.failure_count()
    }

    /// Stop I/O but keep the decode pipeline running.
    pub fn close_channel(&self) {
        self.channel.close();
        self.listeners.clear();
    }

    /// Release the transport, cancel the decode consumer and fail every
    /// pending response. Idempotent.
    pub fn shutdown(&self) {
        if !self.pipeline.is_shut_down() {
            tracing::debug!(connection_id = %self.id, address = %self.address, "Shutting down connection");
        }
        self.channel.close();
        self.pipeline.shutdown();
        self.listeners.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.pipeline.is_shut_down()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("closed", &self.channel.is_closed())
            .finish()
    }
}
