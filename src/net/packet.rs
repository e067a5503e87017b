//! Packet types moving through the client.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use crate::net::frame::encode_frame;

/// An inbound frame whose routing header has been read but whose payload
/// is still encrypted or otherwise undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIncomingPacket {
    pub command: String,
    pub sequence: u32,
    pub payload: Bytes,
}

/// A decoded inbound packet, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPacket {
    pub command: String,
    pub sequence: u32,
    pub body: Bytes,
}

impl IncomingPacket {
    pub fn new(command: impl Into<String>, sequence: u32, body: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            sequence,
            body: body.into(),
        }
    }
}

/// An outbound packet whose bytes are fully framed for the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub command: String,
    pub sequence: u32,
    pub bytes: Bytes,
}

impl OutgoingPacket {
    /// Frame `body` under `command` and `sequence`.
    pub fn new(command: impl Into<String>, sequence: u32, body: &[u8]) -> Self {
        let command = command.into();
        let bytes = encode_frame(&command, sequence, body);
        Self {
            command,
            sequence,
            bytes,
        }
    }
}

impl fmt::Debug for OutgoingPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingPacket")
            .field("command", &self.command)
            .field("sequence", &self.sequence)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Source of outbound sequence ids, shared by everything that sends on
/// behalf of one client.
#[derive(Debug)]
pub struct SequenceIds(AtomicU32);

impl SequenceIds {
    pub fn new(start: u32) -> Self {
        Self(AtomicU32::new(start))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::new(1)
    }
}
