//! Fixed-layout message header and command codes

use crate::error::DecodeError;
use bytes::{Buf, BufMut};

/// Length of the per-message nonce carried in the header.
pub const NONCE_LEN: usize = 24;

/// Length of the zero-filled reserved region (forward compatibility).
pub const RESERVED_LEN: usize = 24;

/// Total encoded header size: four u32 fields plus nonce and reserved.
pub const HEADER_LEN: usize = 16 + NONCE_LEN + RESERVED_LEN;

/// Protocol command codes.
///
/// `Put` through `Do` are the four request kinds; `Ack` and `Error` are
/// response codes generated by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandCode {
    /// Upload a file to the agent
    Put = 1,
    /// Download a file from the agent
    Get = 2,
    /// Load a code module on the agent
    Load = 3,
    /// Execute a previously loaded module
    Do = 4,
    /// Acknowledgement of a specific chunk index
    Ack = 5,
    /// Typed error response
    Error = 6,
}

impl CommandCode {
    /// Decode a wire command code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Put),
            2 => Some(Self::Get),
            3 => Some(Self::Load),
            4 => Some(Self::Do),
            5 => Some(Self::Ack),
            6 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Fixed-layout header preceding every message payload.
///
/// Encoded in network byte order as
/// `command:u32, payload_length:u32, chunk_current:u32, chunk_total:u32`
/// followed by the 24-byte nonce and 24 reserved (zero) bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Command code for this message
    pub command: CommandCode,
    /// Exact byte length of the payload following the header
    pub payload_length: u32,
    /// Zero-based index of the chunk this message carries or acknowledges
    pub chunk_current: u32,
    /// Total chunk count of the transfer; 0 marks a non-chunked control message
    pub chunk_total: u32,
    /// Per-message nonce, unique per channel direction
    pub nonce: [u8; NONCE_LEN],
}

impl MessageHeader {
    /// Create a non-chunked control header (`chunk_total == 0`).
    pub fn control(command: CommandCode, payload_length: u32, nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            command,
            payload_length,
            chunk_current: 0,
            chunk_total: 0,
            nonce,
        }
    }

    /// Create a data-chunk header.
    pub fn chunk(
        command: CommandCode,
        payload_length: u32,
        chunk_current: u32,
        chunk_total: u32,
        nonce: [u8; NONCE_LEN],
    ) -> Self {
        Self {
            command,
            payload_length,
            chunk_current,
            chunk_total,
            nonce,
        }
    }

    /// True for non-chunked control messages.
    pub fn is_control(&self) -> bool {
        self.chunk_total == 0
    }

    /// Serialize into the fixed 64-byte wire layout.
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.command as u32);
        buf.put_u32(self.payload_length);
        buf.put_u32(self.chunk_current);
        buf.put_u32(self.chunk_total);
        buf.put_slice(&self.nonce);
        buf.put_slice(&[0u8; RESERVED_LEN]);
    }

    /// The first 16 header bytes (the four u32 fields), used as AEAD
    /// associated data by the channel layer.
    pub fn aad(&self) -> [u8; 16] {
        let mut aad = [0u8; 16];
        aad[0..4].copy_from_slice(&(self.command as u32).to_be_bytes());
        aad[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
        aad[8..12].copy_from_slice(&self.chunk_current.to_be_bytes());
        aad[12..16].copy_from_slice(&self.chunk_total.to_be_bytes());
        aad
    }

    /// Parse a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// Fails `Malformed` on an unrecognized command code, non-zero reserved
    /// bytes, or a chunk index outside the declared total.
    pub fn read_from(mut buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let raw_command = buf.get_u32();
        let command = CommandCode::from_u32(raw_command)
            .ok_or(DecodeError::Malformed("unrecognized command code"))?;
        let payload_length = buf.get_u32();
        let chunk_current = buf.get_u32();
        let chunk_total = buf.get_u32();

        let mut nonce = [0u8; NONCE_LEN];
        buf.copy_to_slice(&mut nonce);

        let mut reserved = [0u8; RESERVED_LEN];
        buf.copy_to_slice(&mut reserved);
        if reserved != [0u8; RESERVED_LEN] {
            return Err(DecodeError::Malformed("non-zero reserved bytes"));
        }

        if chunk_total != 0 && chunk_current >= chunk_total {
            return Err(DecodeError::Malformed("chunk index outside declared total"));
        }

        Ok(Self {
            command,
            payload_length,
            chunk_current,
            chunk_total,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn nonce(fill: u8) -> [u8; NONCE_LEN] {
        [fill; NONCE_LEN]
    }

    #[test]
    fn header_roundtrip() {
        let header = MessageHeader::chunk(CommandCode::Put, 512, 3, 10, nonce(7));
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let parsed = MessageHeader::read_from(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn control_header_allows_any_chunk_current() {
        // ACKs carry the acknowledged index with chunk_total == 0.
        let header = MessageHeader {
            command: CommandCode::Ack,
            payload_length: 0,
            chunk_current: 41,
            chunk_total: 0,
            nonce: nonce(1),
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        let parsed = MessageHeader::read_from(&buf).unwrap();
        assert_eq!(parsed.chunk_current, 41);
        assert!(parsed.is_control());
    }

    #[test]
    fn unknown_command_rejected() {
        let header = MessageHeader::control(CommandCode::Put, 0, nonce(0));
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        buf[0..4].copy_from_slice(&99u32.to_be_bytes());
        assert!(matches!(
            MessageHeader::read_from(&buf),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn nonzero_reserved_rejected() {
        let header = MessageHeader::control(CommandCode::Ack, 0, nonce(0));
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        let last = buf.len() - 1;
        buf[last] = 0xFF;
        assert!(matches!(
            MessageHeader::read_from(&buf),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn chunk_index_invariant_enforced() {
        let mut buf = BytesMut::new();
        MessageHeader::chunk(CommandCode::Put, 0, 1, 4, nonce(0)).write_to(&mut buf);
        // chunk_current == chunk_total is invalid for chunked messages
        buf[8..12].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(
            MessageHeader::read_from(&buf),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn short_buffer_truncated() {
        let err = MessageHeader::read_from(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }
}
