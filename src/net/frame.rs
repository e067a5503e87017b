//! Routing header inside each length-delimited frame.
//!
//! ```text
//! +-------------+-----------------+-----------------+----------+
//! | sequence u32 | command len u16 | command (UTF-8) | payload  |
//! +-------------+-----------------+-----------------+----------+
//! ```
//!
//! All integers are big-endian. The outer length prefix belongs to the
//! transport.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::net::packet::RawIncomingPacket;

const HEADER_LEN: usize = 6;

/// Build a frame body for `command`.
pub fn encode_frame(command: &str, sequence: u32, payload: &[u8]) -> Bytes {
    let command = command.as_bytes();
    let command_len = command.len().min(u16::MAX as usize);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + command_len + payload.len());
    buf.put_u32(sequence);
    buf.put_u16(command_len as u16);
    buf.put_slice(&command[..command_len]);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a frame into its routing header and opaque payload.
pub fn decode_frame(mut frame: Bytes) -> Result<RawIncomingPacket, DecodeError> {
    if frame.len() < HEADER_LEN {
        return Err(DecodeError::Malformed(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }

    let sequence = frame.get_u32();
    let command_len = frame.get_u16() as usize;
    if frame.len() < command_len {
        return Err(DecodeError::Malformed(format!(
            "command length {command_len} exceeds remaining {} bytes",
            frame.len()
        )));
    }

    let command = frame.split_to(command_len);
    let command = std::str::from_utf8(&command)
        .map_err(|_| DecodeError::Malformed("command is not UTF-8".into()))?
        .to_owned();

    Ok(RawIncomingPacket {
        command,
        sequence,
        payload: frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_is_readable() {
        let frame = encode_frame("login.password", 42, b"secret");
        let raw = decode_frame(frame).unwrap();
        assert_eq!(raw.command, "login.password");
        assert_eq!(raw.sequence, 42);
        assert_eq!(&raw.payload[..], b"secret");
    }

    #[test]
    fn empty_payload_is_allowed() {
        let raw = decode_frame(encode_frame("heartbeat", 1, b"")).unwrap();
        assert!(raw.payload.is_empty());
    }

    #[test]
    fn short_frame_is_malformed() {
        let err = decode_frame(Bytes::from_static(&[0, 0, 1])).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn overlong_command_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u16(50);
        buf.put_slice(b"abc");
        assert!(decode_frame(buf.freeze()).is_err());
    }

    #[test]
    fn invalid_utf8_command_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u16(2);
        buf.put_slice(&[0xff, 0xfe]);
        assert!(decode_frame(buf.freeze()).is_err());
    }
}
