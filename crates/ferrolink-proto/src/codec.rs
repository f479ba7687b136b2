//! Pure encode/decode of headers plus payloads
//!
//! The codec performs no I/O and holds no connection state. Reading bytes
//! off a socket and decrypting payloads is the channel layer's job; this
//! module only maps between byte slices and `(header, payload)` pairs.

use crate::error::DecodeError;
use crate::header::{MessageHeader, HEADER_LEN};
use bytes::{Bytes, BytesMut};

/// Default cap on a single message payload: one 1 MiB chunk plus room for
/// the serialized chunk envelope and the AEAD tag.
pub const MAX_PAYLOAD_LEN: u32 = 2 * 1024 * 1024;

/// Stateless message codec with a configurable payload-size cap.
#[derive(Debug, Clone)]
pub struct Codec {
    max_payload_len: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Create a codec with the default payload cap.
    pub fn new() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    /// Create a codec with a custom payload cap.
    pub fn with_max_payload_len(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }

    /// Encode a header and payload into a single wire buffer.
    ///
    /// The header's `payload_length` must already match `payload.len()`;
    /// callers construct headers through the channel layer which guarantees
    /// this.
    pub fn encode(&self, header: &MessageHeader, payload: &[u8]) -> Result<Bytes, DecodeError> {
        debug_assert_eq!(header.payload_length as usize, payload.len());
        if header.payload_length > self.max_payload_len {
            return Err(DecodeError::PayloadTooLarge {
                length: header.payload_length,
                max: self.max_payload_len,
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        header.write_to(&mut buf);
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }

    /// Decode a full message from `bytes`.
    ///
    /// Fails `Truncated` when fewer bytes are available than the header
    /// plus the declared `payload_length`, and `PayloadTooLarge` before
    /// any payload allocation when the declared length exceeds the cap.
    pub fn decode(&self, bytes: &[u8]) -> Result<(MessageHeader, Bytes), DecodeError> {
        let header = self.decode_header(bytes)?;
        let total = HEADER_LEN + header.payload_length as usize;
        if bytes.len() < total {
            return Err(DecodeError::Truncated {
                needed: total,
                available: bytes.len(),
            });
        }
        let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..total]);
        Ok((header, payload))
    }

    /// Decode and validate just the header, including the payload-size cap.
    pub fn decode_header(&self, bytes: &[u8]) -> Result<MessageHeader, DecodeError> {
        let header = MessageHeader::read_from(bytes)?;
        if header.payload_length > self.max_payload_len {
            return Err(DecodeError::PayloadTooLarge {
                length: header.payload_length,
                max: self.max_payload_len,
            });
        }
        Ok(header)
    }

    /// The configured payload cap.
    pub fn max_payload_len(&self) -> u32 {
        self.max_payload_len
    }
}
