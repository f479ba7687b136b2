//! # Ferrolink Protocol
//!
//! Wire format, message headers, and codec for the Ferrolink
//! remote-operations protocol.
//!
//! The codec is a pure transform: it owns no I/O and no connection state.
//! Encryption happens a layer above in `ferrolink-channel`; the payload
//! bytes handled here are opaque to the codec.

#![warn(missing_docs)]

/// Fixed-layout message header and command codes
pub mod header;

/// Pure encode/decode of headers plus payloads
pub mod codec;

/// Typed payload structures carried inside messages
pub mod payload;

/// Error types for wire-format operations
pub mod error;

pub use codec::Codec;
pub use error::DecodeError;
pub use header::{CommandCode, MessageHeader, HEADER_LEN, NONCE_LEN, RESERVED_LEN};
pub use payload::{
    ChunkData, ErrorDetails, ErrorKind, ExecOutput, ExecRequest, GetRequest, LoadRequest,
    TransferFinish,
};
