use ferrolink_channel::ChannelError;
use ferrolink_proto::{DecodeError, ErrorKind};
use thiserror::Error;

/// Errors surfaced by the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A transfer for the same path and direction is already running on
    /// this connection.
    #[error("transfer already active for {0}")]
    AlreadyActive(String),

    /// The received file's digest did not match the sender's. Terminal:
    /// the transfer is not retried.
    #[error("integrity verification failed for {path}")]
    Integrity {
        /// Remote path of the failed transfer
        path: String,
    },

    /// A chunk went unacknowledged through the whole resend budget.
    #[error("chunk {chunk} unacknowledged after {attempts} attempts")]
    RetriesExhausted {
        /// Index of the abandoned chunk
        chunk: u32,
        /// Total send attempts made
        attempts: u32,
    },

    /// The file exceeds the configured size limit.
    #[error("file is {size} bytes, limit is {max}")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Configured limit
        max: u64,
    },

    /// The peer reported an error mid-transfer.
    #[error("peer error ({kind:?}): {message}")]
    Peer {
        /// Error category reported by the peer
        kind: ErrorKind,
        /// Human-readable detail from the peer
        message: String,
    },

    /// The peer sent something the transfer state machine cannot accept.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The underlying channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A payload failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
