//! Typed payload structures carried inside messages
//!
//! Payloads travel encrypted on the wire; at this layer they are plain
//! bincode-serialized structs. Each transfer-related payload carries the
//! remote path so the receiving side can key its state by path alone,
//! without persistent cross-references.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// One data chunk of an in-flight transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkData {
    /// Remote path identifying the transfer
    pub path: String,
    /// Raw chunk bytes
    pub data: Vec<u8>,
}

/// Terminal message of a transfer: declared size and whole-file SHA-256.
///
/// Also the *only* message of a zero-byte transfer, sent with
/// `chunk_total == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFinish {
    /// Remote path identifying the transfer
    pub path: String,
    /// Total file size in bytes
    pub size: u64,
    /// SHA-256 over the complete file content
    pub sha256: [u8; 32],
}

/// Request to download a remote file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    /// Remote path to read
    pub path: String,
}

/// Request to load a code module on the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Module identifier, unique per agent
    pub identifier: String,
    /// Expected SHA-256 of `code`, verified before activation
    pub sha256: [u8; 32],
    /// Module bytecode
    pub code: Vec<u8>,
}

/// Request to execute a previously loaded module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Module identifier
    pub identifier: String,
    /// Arguments handed to the module
    pub args: Vec<String>,
}

/// Successful execution result, carried in the response to a DO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Output captured from the module
    pub output: String,
    /// Wall-clock execution duration in milliseconds
    pub duration_ms: u64,
}

/// Error category carried in ERROR responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Request was malformed or referenced an illegal path
    InvalidRequest,
    /// Referenced file does not exist
    NotFound,
    /// A transfer for the same (direction, path) is already active
    TransferActive,
    /// Whole-file hash verification failed
    Integrity,
    /// File exceeds the maximum supported size
    TooLarge,
    /// Module identifier is not loaded
    NotLoaded,
    /// Module is currently executing
    Busy,
    /// Module failed to load
    LoadFailed,
    /// Module execution failed
    ExecFailed,
    /// Operation timed out on the agent side
    Timeout,
    /// Unexpected internal failure
    Internal,
}

/// Typed payload of an ERROR response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
}

impl ErrorDetails {
    /// Create error details.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Serialize a payload struct for the wire.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, DecodeError> {
    bincode::serialize(value).map_err(|e| DecodeError::Payload(e.to_string()))
}

/// Deserialize a payload struct received from the wire.
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, DecodeError> {
    bincode::deserialize(bytes).map_err(|e| DecodeError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_data_roundtrip() {
        let chunk = ChunkData {
            path: "logs/app.bin".to_string(),
            data: vec![1, 2, 3, 4],
        };
        let bytes = to_bytes(&chunk).unwrap();
        let back: ChunkData = from_bytes(&bytes).unwrap();
        assert_eq!(back.path, chunk.path);
        assert_eq!(back.data, chunk.data);
    }

    #[test]
    fn error_details_roundtrip() {
        let details = ErrorDetails::new(ErrorKind::Integrity, "hash mismatch");
        let bytes = to_bytes(&details).unwrap();
        let back: ErrorDetails = from_bytes(&bytes).unwrap();
        assert_eq!(back.kind, ErrorKind::Integrity);
        assert_eq!(back.message, "hash mismatch");
    }

    #[test]
    fn garbage_payload_rejected() {
        let err = from_bytes::<TransferFinish>(&[0xFF, 0x01]).unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)));
    }
}
