//! Transport seam.
//!
//! # Responsibilities
//! - Open a byte connection to a [`ServerAddress`]
//! - Feed inbound frames to the decode pipeline through an [`InboundSink`]
//! - Report disconnects exactly once per connection

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::decode::PacketSender;
use crate::error::{DecodeError, TransportError};
use crate::net::packet::RawIncomingPacket;
use crate::net::server_list::ServerAddress;

type DisconnectHook = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Where a transport delivers what it reads.
#[derive(Clone)]
pub struct InboundSink {
    packets: PacketSender,
    on_disconnect: DisconnectHook,
}

impl InboundSink {
    pub fn new(packets: PacketSender, on_disconnect: impl Fn(TransportError) + Send + Sync + 'static) -> Self {
        Self {
            packets,
            on_disconnect: Arc::new(on_disconnect),
        }
    }

    /// Hand a frame to the decode queue, waiting for room.
    pub async fn deliver(&self, raw: RawIncomingPacket) -> Result<(), DecodeError> {
        self.packets.send(raw).await
    }

    /// Hand a frame to the decode queue without waiting.
    pub fn try_deliver(&self, raw: RawIncomingPacket) -> Result<(), DecodeError> {
        self.packets.try_send(raw)
    }

    /// The peer went away or the stream failed.
    pub fn disconnected(&self, error: TransportError) {
        (self.on_disconnect)(error);
    }
}

impl fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundSink")
            .field("closed", &self.packets.is_closed())
            .finish()
    }
}

/// Opens connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &ServerAddress, sink: InboundSink) -> Result<Arc<dyn Channel>, TransportError>;
}

/// The write half of an open connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Write one fully framed packet.
    async fn send(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Stop reading and writing. Idempotent, never blocks.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
