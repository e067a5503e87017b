//! Raw-to-typed packet decoding.

use std::sync::Arc;

use crate::crypto::{CipherService, SharedSecret};
use crate::error::DecodeError;
use crate::net::{IncomingPacket, RawIncomingPacket};

/// Turns a raw packet into a typed one.
pub trait PacketCodec: Send + Sync {
    /// `Ok(None)` means the packet is well-formed but not one this codec
    /// understands; it is skipped.
    fn decode(
        &self,
        raw: RawIncomingPacket,
        secret: Option<&SharedSecret>,
    ) -> Result<Option<IncomingPacket>, DecodeError>;
}

/// Decrypts payloads with the session secret once one is installed.
///
/// Before key exchange completes payloads pass through untouched.
pub struct CipherPacketCodec {
    cipher: Arc<dyn CipherService>,
}

impl CipherPacketCodec {
    pub fn new(cipher: Arc<dyn CipherService>) -> Self {
        Self { cipher }
    }
}

impl PacketCodec for CipherPacketCodec {
    fn decode(
        &self,
        raw: RawIncomingPacket,
        secret: Option<&SharedSecret>,
    ) -> Result<Option<IncomingPacket>, DecodeError> {
        if raw.command.is_empty() {
            return Ok(None);
        }

        let body = match secret {
            Some(secret) => self
                .cipher
                .decrypt(secret, &raw.payload)
                .map_err(|e| DecodeError::Decrypt {
                    command: raw.command.clone(),
                    reason: e.0,
                })?
                .into(),
            None => raw.payload,
        };

        Ok(Some(IncomingPacket {
            command: raw.command,
            sequence: raw.sequence,
            body,
        }))
    }
}
