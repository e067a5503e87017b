use std::sync::{Arc, Weak};

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::config::HeartbeatConfig;
use crate::error::Error;
use crate::handler::network::Inner;
use crate::net::{Connection, SequenceIds};
use crate::sso::LoginProtocol;

/// Start the heartbeat for `connection`, or `None` if heartbeats are
/// disabled.
///
/// The first heartbeat goes out one interval after `Ok` is reached. The
/// task ends on its first failure, after reporting the connection lost.
pub(crate) fn spawn(
    handler: Weak<Inner>,
    connection: &Arc<Connection>,
    protocol: Arc<dyn LoginProtocol>,
    sequences: Arc<SequenceIds>,
    config: &HeartbeatConfig,
) -> Option<AbortHandle> {
    if !config.enabled {
        return None;
    }
    let task = tokio::spawn(run(
        handler,
        Arc::downgrade(connection),
        protocol,
        sequences,
        config.clone(),
    ));
    Some(task.abort_handle())
}

async fn run(
    handler: Weak<Inner>,
    connection: Weak<Connection>,
    protocol: Arc<dyn LoginProtocol>,
    sequences: Arc<SequenceIds>,
    config: HeartbeatConfig,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(connection) = connection.upgrade() else {
            break;
        };
        let Some(packet) = protocol.heartbeat(sequences.next()) else {
            tracing::debug!("Protocol has no heartbeat, stopping");
            break;
        };

        match connection.send_and_expect(&packet, config.timeout()).await {
            Ok(_) => {
                tracing::trace!(connection_id = %connection.id(), sequence = packet.sequence, "Heartbeat ok");
            }
            Err(error) => {
                tracing::warn!(connection_id = %connection.id(), error = %error, "Heartbeat failed");
                if let Some(handler) = handler.upgrade() {
                    handler.connection_lost(connection.id(), Error::HeartbeatFailed(Box::new(error)));
                }
                break;
            }
        }
    }
}
