//! Response matching for request/response packets.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{Error, TransportError};
use crate::net::packet::IncomingPacket;

type ListenerKey = (String, u32);

/// Waiting requests keyed by `(command, sequence)`.
#[derive(Debug, Default)]
pub struct PacketListeners {
    waiting: DashMap<ListenerKey, oneshot::Sender<IncomingPacket>>,
}

impl PacketListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for the response to `command`/`sequence`.
    ///
    /// A newer registration for the same key replaces the older one.
    pub fn register(self: &Arc<Self>, command: &str, sequence: u32) -> ResponseListener {
        let (tx, rx) = oneshot::channel();
        let key = (command.to_owned(), sequence);
        self.waiting.insert(key.clone(), tx);
        ResponseListener {
            key,
            rx,
            listeners: Arc::clone(self),
        }
    }

    /// Complete the listener waiting for `packet`, if any.
    pub fn complete(&self, packet: &IncomingPacket) -> bool {
        let key = (packet.command.clone(), packet.sequence);
        match self.waiting.remove(&key) {
            Some((_, tx)) => tx.send(packet.clone()).is_ok(),
            None => false,
        }
    }

    /// Fail every waiting listener.
    pub fn clear(&self) {
        self.waiting.clear();
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// One pending response. Unregisters itself when dropped.
#[derive(Debug)]
pub struct ResponseListener {
    key: ListenerKey,
    rx: oneshot::Receiver<IncomingPacket>,
    listeners: Arc<PacketListeners>,
}

impl ResponseListener {
    /// Wait for the response. Fails if the connection is torn down first.
    ///
    /// Cancel-safe: dropping the future keeps the registration alive.
    pub async fn recv(&mut self) -> Result<IncomingPacket, Error> {
        (&mut self.rx)
            .await
            .map_err(|_| Error::from(TransportError::ChannelClosed))
    }
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        // only remove our own sender, not a newer registration
        self.rx.close();
        self.listeners
            .waiting
            .remove_if(&self.key, |_, tx| tx.is_closed());
    }
}
