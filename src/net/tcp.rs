//! TCP transport with length-delimited framing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::net::frame::decode_frame;
use crate::net::server_list::ServerAddress;
use crate::net::transport::{Channel, InboundSink, Transport};
use crate::observability::metrics;

/// Connects over TCP; every frame carries a 4-byte big-endian length prefix.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame_length: usize,
}

impl TcpTransport {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(self.max_frame_length)
            .new_codec()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(crate::config::DecodeConfig::default().max_frame_length)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &ServerAddress, sink: InboundSink) -> Result<Arc<dyn Channel>, TransportError> {
        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                source: Arc::new(e),
            })?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let cancel = CancellationToken::new();

        tokio::spawn(read_frames(
            FramedRead::new(read, self.codec()),
            sink,
            cancel.clone(),
            address.to_string(),
        ));

        tracing::debug!(address = %address, "TCP connection established");
        Ok(Arc::new(TcpChannel {
            writer: Mutex::new(FramedWrite::new(write, self.codec())),
            cancel,
        }))
    }
}

async fn read_frames(
    mut frames: FramedRead<tokio::net::tcp::OwnedReadHalf, LengthDelimitedCodec>,
    sink: InboundSink,
    cancel: CancellationToken,
    peer: String,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => match decode_frame(frame.freeze()) {
                Ok(raw) => {
                    if sink.deliver(raw).await.is_err() {
                        tracing::debug!(peer = %peer, "Decode pipeline closed, stopping reader");
                        return;
                    }
                }
                Err(error) => {
                    metrics::record_decode_failure();
                    tracing::warn!(peer = %peer, error = %error, "Dropping malformed frame");
                }
            },
            Some(Err(error)) => {
                cancel.cancel();
                sink.disconnected(error.into());
                return;
            }
            None => {
                cancel.cancel();
                sink.disconnected(TransportError::Disconnected);
                return;
            }
        }
    }
}

struct TcpChannel {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::ChannelClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(bytes).await?;
        Ok(())
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
