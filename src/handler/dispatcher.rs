use std::sync::{Arc, Weak};

use tokio::sync::broadcast;

use crate::decode::PacketDispatcher;
use crate::error::Error;
use crate::handler::network::Inner;
use crate::net::{ConnectionId, IncomingPacket, PacketListeners};
use crate::sso::LoginProtocol;

/// Routes the decoded packets of one connection.
///
/// A server kick moves the handler to `ConnectionLost`; anything else
/// completes a waiting listener if one matches and is then broadcast.
pub(crate) struct ConnectionDispatcher {
    handler: Weak<Inner>,
    connection: ConnectionId,
    listeners: Arc<PacketListeners>,
    packets: broadcast::Sender<IncomingPacket>,
    protocol: Arc<dyn LoginProtocol>,
}

impl ConnectionDispatcher {
    pub(crate) fn new(
        handler: Weak<Inner>,
        connection: ConnectionId,
        listeners: Arc<PacketListeners>,
        packets: broadcast::Sender<IncomingPacket>,
        protocol: Arc<dyn LoginProtocol>,
    ) -> Self {
        Self {
            handler,
            connection,
            listeners,
            packets,
            protocol,
        }
    }
}

impl PacketDispatcher for ConnectionDispatcher {
    fn dispatch(&self, packet: IncomingPacket) {
        if let Some(reason) = self.protocol.forced_offline_reason(&packet) {
            tracing::warn!(connection_id = %self.connection, reason = %reason, "Forced offline by server");
            if let Some(handler) = self.handler.upgrade() {
                handler.connection_lost(self.connection, Error::ForcedDisconnect { reason });
            }
            return;
        }

        if self.listeners.complete(&packet) {
            tracing::trace!(command = %packet.command, sequence = packet.sequence, "Response matched");
        }
        // no subscribers is fine
        let _ = self.packets.send(packet);
    }
}
