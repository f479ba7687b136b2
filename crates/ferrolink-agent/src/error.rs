use ferrolink_channel::ChannelError;
use ferrolink_proto::DecodeError;
use thiserror::Error;

/// Errors that end an agent connection or the agent itself.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The secure channel failed irrecoverably.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A response payload failed to serialize.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Listener or filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The module runtime could not be constructed.
    #[error(transparent)]
    Module(#[from] ferrolink_module::ModuleError),
}
