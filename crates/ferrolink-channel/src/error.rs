//! Channel error types

use ferrolink_proto::DecodeError;
use thiserror::Error;

/// Errors produced by the secure channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Key exchange failed; the underlying stream is closed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A message failed authentication; the message is dropped but the
    /// channel stays open until the failure threshold is reached
    #[error("message failed authentication")]
    Auth,

    /// An I/O operation did not complete within the configured deadline
    #[error("channel operation timed out")]
    Timeout,

    /// The channel has been closed and accepts no further operations
    #[error("channel closed")]
    Closed,

    /// Malformed wire data; connection-fatal
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Underlying I/O failure
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}
