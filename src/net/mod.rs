//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerList::poll_any
//!     → Transport::connect (tcp.rs, or an embedder-supplied transport)
//!     → reader task: frame.rs header split → InboundSink → decode queue
//!     → Connection (channel + decode pipeline + listeners + secret)
//!
//! Outbound:
//!     OutgoingPacket (framed by frame.rs) → Connection::send → Channel
//!     send_and_expect: listeners.rs matches the response by (command, seq)
//! ```
//!
//! # Design Decisions
//! - Everything per-connection lives in `Connection` and dies with it
//! - Transport is a trait so tests and embedders can supply their own

pub mod connection;
pub mod frame;
pub mod listeners;
pub mod packet;
pub mod server_list;
pub mod tcp;
pub mod transport;

pub use connection::{Connection, ConnectionId};
pub use listeners::{PacketListeners, ResponseListener};
pub use packet::{IncomingPacket, OutgoingPacket, RawIncomingPacket, SequenceIds};
pub use server_list::{ServerAddress, ServerList};
pub use tcp::TcpTransport;
pub use transport::{Channel, InboundSink, Transport};
