//! Error types for wire-format operations

use thiserror::Error;

/// Errors produced while decoding wire data.
///
/// All decode failures are connection-fatal: a peer producing malformed
/// bytes cannot be resynchronized on a stream protocol.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer bytes available than the fixed header plus declared payload
    #[error("truncated message: needed {needed} bytes, had {available}")]
    Truncated {
        /// Bytes required to decode the message
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Structurally invalid header
    #[error("malformed header: {0}")]
    Malformed(&'static str),

    /// Declared payload length exceeds the configured maximum
    #[error("payload too large: {length} bytes (max: {max})")]
    PayloadTooLarge {
        /// Declared payload length
        length: u32,
        /// Configured maximum
        max: u32,
    },

    /// Payload bytes did not deserialize into the expected structure
    #[error("invalid payload: {0}")]
    Payload(String),
}
