//! Ordered packet-decode pipeline.
//!
//! # Data Flow
//! ```text
//! transport reader task(s)
//!     → PacketSender::send / try_send (bounded queue, backpressure)
//!     → single consumer task (FIFO)
//!         → PacketCodec::decode (decrypts with the connection's secret)
//!         → PacketDispatcher::dispatch (inline, in order)
//! ```
//!
//! # Design Decisions
//! - One consumer per connection: decode order equals arrival order
//! - A bad packet is logged and counted, never fatal to the consumer
//! - Shutdown is a cancellation, not a drain; buffered packets are dropped

pub mod codec;
pub mod pipeline;

pub use codec::{CipherPacketCodec, PacketCodec};
pub use pipeline::{DecodePipeline, PacketDispatcher, PacketSender};
