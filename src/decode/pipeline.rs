//! Bounded queue plus the single consumer task that drains it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crypto::SharedSecret;
use crate::decode::codec::PacketCodec;
use crate::error::DecodeError;
use crate::net::{IncomingPacket, RawIncomingPacket};
use crate::observability::metrics;

/// Receives decoded packets, in arrival order, on the consumer task.
///
/// Called inline; a slow dispatcher back-pressures the transport.
pub trait PacketDispatcher: Send + Sync {
    fn dispatch(&self, packet: IncomingPacket);
}

/// Producer handle onto a [`DecodePipeline`]. Cheap to clone.
#[derive(Clone)]
pub struct PacketSender {
    tx: mpsc::Sender<RawIncomingPacket>,
    cancel: CancellationToken,
}

impl PacketSender {
    /// Enqueue `raw`, waiting for room when the queue is full.
    pub async fn send(&self, raw: RawIncomingPacket) -> Result<(), DecodeError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DecodeError::PipelineClosed),
            sent = self.tx.send(raw) => sent.map_err(|_| DecodeError::PipelineClosed),
        }
    }

    /// Enqueue `raw` without waiting.
    pub fn try_send(&self, raw: RawIncomingPacket) -> Result<(), DecodeError> {
        if self.cancel.is_cancelled() {
            return Err(DecodeError::PipelineClosed);
        }
        self.tx.try_send(raw).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DecodeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DecodeError::PipelineClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    failed: AtomicU64,
}

/// Per-connection decode queue and its consumer task.
///
/// Dropping the pipeline shuts it down.
pub struct DecodePipeline {
    sender: PacketSender,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    consumer: JoinHandle<()>,
}

impl DecodePipeline {
    /// Start the consumer task.
    ///
    /// `secret` is read per packet, so a secret installed mid-stream applies
    /// to every packet dequeued after it.
    pub fn spawn(
        capacity: usize,
        codec: Arc<dyn PacketCodec>,
        secret: Arc<ArcSwapOption<SharedSecret>>,
        dispatcher: Arc<dyn PacketDispatcher>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let consumer = tokio::spawn(consume(
            rx,
            codec,
            secret,
            dispatcher,
            cancel.clone(),
            Arc::clone(&counters),
        ));

        Self {
            sender: PacketSender {
                tx,
                cancel: cancel.clone(),
            },
            cancel,
            counters,
            consumer,
        }
    }

    pub fn sender(&self) -> PacketSender {
        self.sender.clone()
    }

    /// Stop the consumer and discard anything still queued. Never blocks.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.consumer.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Packets decoded and dispatched so far.
    pub fn decoded_count(&self) -> u64 {
        self.counters.decoded.load(Ordering::Relaxed)
    }

    /// Packets that failed to decode so far.
    pub fn failure_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn consume(
    mut rx: mpsc::Receiver<RawIncomingPacket>,
    codec: Arc<dyn PacketCodec>,
    secret: Arc<ArcSwapOption<SharedSecret>>,
    dispatcher: Arc<dyn PacketDispatcher>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(raw) => raw,
                None => break,
            },
        };

        let command = raw.command.clone();
        let sequence = raw.sequence;
        let secret = secret.load_full();

        match codec.decode(raw, secret.as_deref()) {
            Ok(Some(packet)) => {
                counters.decoded.fetch_add(1, Ordering::Relaxed);
                metrics::record_packet_decoded();
                dispatcher.dispatch(packet);
            }
            Ok(None) => {
                tracing::debug!(command = %command, sequence, "Skipping unknown packet");
            }
            Err(error) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_failure();
                tracing::warn!(command = %command, sequence, error = %error, "Failed to decode packet");
            }
        }
    }

    rx.close();
    tracing::debug!(
        decoded = counters.decoded.load(Ordering::Relaxed),
        failed = counters.failed.load(Ordering::Relaxed),
        "Decode consumer stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Fails on command "bad", skips "unknown", passes everything else.
    struct TestCodec;

    impl PacketCodec for TestCodec {
        fn decode(
            &self,
            raw: RawIncomingPacket,
            secret: Option<&SharedSecret>,
        ) -> Result<Option<IncomingPacket>, DecodeError> {
            match raw.command.as_str() {
                "bad" => Err(DecodeError::Malformed("bad".into())),
                "unknown" => Ok(None),
                _ => {
                    let mut body = raw.payload.to_vec();
                    if let Some(secret) = secret {
                        body.extend_from_slice(secret.as_bytes());
                    }
                    Ok(Some(IncomingPacket::new(raw.command, raw.sequence, body)))
                }
            }
        }
    }

    struct Collect(mpsc::UnboundedSender<IncomingPacket>);

    impl PacketDispatcher for Collect {
        fn dispatch(&self, packet: IncomingPacket) {
            let _ = self.0.send(packet);
        }
    }

    fn raw(command: &str, sequence: u32) -> RawIncomingPacket {
        RawIncomingPacket {
            command: command.into(),
            sequence,
            payload: Bytes::new(),
        }
    }

    fn pipeline(
        capacity: usize,
    ) -> (
        DecodePipeline,
        mpsc::UnboundedReceiver<IncomingPacket>,
        Arc<ArcSwapOption<SharedSecret>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let secret = Arc::new(ArcSwapOption::empty());
        let pipeline = DecodePipeline::spawn(
            capacity,
            Arc::new(TestCodec),
            Arc::clone(&secret),
            Arc::new(Collect(tx)),
        );
        (pipeline, rx, secret)
    }

    #[tokio::test]
    async fn preserves_arrival_order() {
        let (pipeline, mut rx, _) = pipeline(4);
        let sender = pipeline.sender();

        for seq in 0..100 {
            sender.send(raw("msg", seq)).await.unwrap();
        }
        for seq in 0..100 {
            assert_eq!(rx.recv().await.unwrap().sequence, seq);
        }
        assert_eq!(pipeline.decoded_count(), 100);
    }

    #[tokio::test]
    async fn decode_failure_does_not_stop_later_packets() {
        let (pipeline, mut rx, _) = pipeline(8);
        let sender = pipeline.sender();

        sender.send(raw("msg", 1)).await.unwrap();
        sender.send(raw("bad", 2)).await.unwrap();
        sender.send(raw("unknown", 3)).await.unwrap();
        sender.send(raw("msg", 4)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 4);
        assert_eq!(pipeline.failure_count(), 1);
        assert_eq!(pipeline.decoded_count(), 2);
    }

    #[tokio::test]
    async fn secret_applies_to_later_packets() {
        let (pipeline, mut rx, secret) = pipeline(8);
        let sender = pipeline.sender();

        sender.send(raw("msg", 1)).await.unwrap();
        assert!(rx.recv().await.unwrap().body.is_empty());

        secret.store(Some(Arc::new(SharedSecret::new(Bytes::from_static(b"key")))));
        sender.send(raw("msg", 2)).await.unwrap();
        assert_eq!(&rx.recv().await.unwrap().body[..], b"key");
    }

    #[tokio::test]
    async fn try_send_fails_fast_when_full() {
        let (pipeline, _rx, _) = pipeline(1);
        let sender = pipeline.sender();

        // the consumer has not been polled yet on this single-threaded runtime
        sender.try_send(raw("msg", 1)).unwrap();
        assert!(matches!(
            sender.try_send(raw("msg", 2)),
            Err(DecodeError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn shutdown_rejects_producers_and_discards_buffer() {
        let (pipeline, mut rx, _) = pipeline(8);
        let sender = pipeline.sender();

        pipeline.shutdown();
        assert!(pipeline.is_shut_down());
        assert!(matches!(
            sender.send(raw("msg", 1)).await,
            Err(DecodeError::PipelineClosed)
        ));
        assert!(matches!(
            sender.try_send(raw("msg", 2)),
            Err(DecodeError::PipelineClosed)
        ));

        // consumer is gone, dispatcher side closes
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn drop_shuts_down() {
        let (pipeline, _rx, _) = pipeline(8);
        let sender = pipeline.sender();
        drop(pipeline);
        assert!(sender.is_closed());
    }
}
