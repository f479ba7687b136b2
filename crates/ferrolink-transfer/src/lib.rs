//! # Ferrolink Transfer
//!
//! Chunked file transfer over a [`SecureChannel`], with per-chunk
//! acknowledgements, bounded resends, and end-to-end SHA-256 integrity
//! verification.
//!
//! Files travel as a numbered sequence of data chunks followed by a
//! finish message carrying the total size and digest. Each chunk is
//! acknowledged individually; the sender resends unacknowledged chunks
//! up to a retry budget, and the receiver writes into a `.part` sidecar
//! that is renamed into place only after the digest checks out.
//!
//! [`SecureChannel`]: ferrolink_channel::SecureChannel

#![warn(missing_docs)]

use std::time::Duration;

/// Sending side of a transfer
pub mod send;

/// Receiving side of a transfer
pub mod recv;

/// Per-connection transfer bookkeeping
pub mod state;

/// Transfer error types
pub mod error;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::TransferError;
pub use recv::{receive_file, receive_file_resumed, ReceivedFile};
pub use send::send_file;
pub use state::{ActiveTransfers, Direction, TransferPermit};

/// Default data bytes carried per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default upper bound on a single transferred file.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Transfer engine tuning knobs.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Data bytes per chunk
    pub chunk_size: usize,
    /// How long the sender waits for each acknowledgement before
    /// resending
    pub ack_timeout: Duration,
    /// Resends allowed per chunk before the transfer is abandoned
    pub max_retries: u32,
    /// Largest file accepted for transfer, in bytes
    pub max_file_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout: Duration::from_secs(10),
            max_retries: 10,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TransferConfig {
    /// The receiver's idle deadline: long enough to outlast the
    /// sender's entire resend budget for one chunk.
    pub fn recv_idle_timeout(&self) -> Duration {
        self.ack_timeout
            .saturating_mul(self.max_retries.saturating_add(2))
    }
}
