use ferrolink_channel::ChannelError;
use ferrolink_proto::{DecodeError, ErrorKind};
use ferrolink_transfer::TransferError;
use thiserror::Error;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection could be established within the attempt budget.
    #[error("could not connect after {attempts} attempts: {last}")]
    ConnectFailed {
        /// Attempts made
        attempts: u32,
        /// The final attempt's failure
        last: String,
    },

    /// The agent rejected a request.
    #[error("agent error ({kind:?}): {message}")]
    Agent {
        /// Error category reported by the agent
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },

    /// A transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The secure channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A response failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The agent sent a response the client cannot interpret.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}
