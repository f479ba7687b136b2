//! # Ferrolink Channel
//!
//! Turns a raw duplex byte stream into a sequence of authenticated,
//! confidential protocol messages.
//!
//! A channel is established with a single-round-trip exchange of ephemeral
//! X25519 key material, after which every message payload is sealed with
//! XChaCha20-Poly1305. The 24-byte wire nonce is the sender's per-session
//! direction salt followed by a monotonically increasing counter, so no
//! nonce is ever reused on a direction, even across resends of the same
//! chunk.

#![warn(missing_docs)]

/// Ephemeral key exchange and session key derivation
pub mod handshake;

/// The encrypted message channel
pub mod channel;

/// Channel error types
pub mod error;

pub use channel::{ChannelConfig, SecureChannel};
pub use error::ChannelError;
pub use handshake::SessionKeys;
