//! The encrypted message channel
//!
//! Wraps a duplex byte stream. Headers travel in the clear (and are
//! authenticated as associated data); payloads are XChaCha20-Poly1305
//! ciphertext. All reads and writes are bounded by the configured
//! deadline.

use crate::error::ChannelError;
use crate::handshake::{self, SessionKeys, SALT_LEN};
use bytes::Bytes;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ferrolink_proto::payload::{self, ErrorDetails};
use ferrolink_proto::{Codec, CommandCode, MessageHeader, HEADER_LEN, NONCE_LEN};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// AEAD authentication tag length appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Channel tuning knobs.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline for any single read or write (default: 10 s)
    pub timeout: Duration,
    /// Consecutive authentication failures tolerated before the channel
    /// closes (default: 5)
    pub max_auth_failures: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_auth_failures: 5,
        }
    }
}

/// An established, authenticated-encrypted session over one connection.
pub struct SecureChannel<S> {
    io: S,
    codec: Codec,
    seal: XChaCha20Poly1305,
    open: XChaCha20Poly1305,
    send_salt: [u8; SALT_LEN],
    recv_salt: [u8; SALT_LEN],
    send_counter: u64,
    auth_failures: u32,
    closed: bool,
    config: ChannelConfig,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Dial-side construction: run the initiating handshake, then wrap the
    /// stream.
    pub async fn connect(mut io: S, config: ChannelConfig) -> Result<Self, ChannelError> {
        let keys = handshake::initiate(&mut io, config.timeout).await?;
        Ok(Self::from_parts(io, &keys, config))
    }

    /// Accept-side construction: run the accepting handshake, then wrap the
    /// stream.
    pub async fn accept(mut io: S, config: ChannelConfig) -> Result<Self, ChannelError> {
        let keys = handshake::accept(&mut io, config.timeout).await?;
        Ok(Self::from_parts(io, &keys, config))
    }

    /// Build a channel from already-derived session keys.
    pub fn from_parts(io: S, keys: &SessionKeys, config: ChannelConfig) -> Self {
        Self {
            io,
            codec: Codec::new(),
            seal: XChaCha20Poly1305::new(Key::from_slice(&keys.send_key)),
            open: XChaCha20Poly1305::new(Key::from_slice(&keys.recv_key)),
            send_salt: keys.send_salt,
            recv_salt: keys.recv_salt,
            send_counter: 0,
            auth_failures: 0,
            closed: false,
            config,
        }
    }

    /// The configured per-operation deadline.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Seal and send one message.
    ///
    /// Every call consumes a fresh nonce, so a resend of the same chunk is
    /// a distinct ciphertext on the wire.
    pub async fn send(
        &mut self,
        command: CommandCode,
        chunk_current: u32,
        chunk_total: u32,
        plaintext: &[u8],
    ) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let nonce = self.next_nonce()?;
        let header = MessageHeader {
            command,
            payload_length: (plaintext.len() + TAG_LEN) as u32,
            chunk_current,
            chunk_total,
            nonce,
        };

        let ciphertext = self
            .seal
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &header.aad(),
                },
            )
            .map_err(|_| ChannelError::Closed)?;

        let wire = self.codec.encode(&header, &ciphertext).map_err(|e| {
            self.closed = true;
            ChannelError::Decode(e)
        })?;

        match tokio::time::timeout(self.config.timeout, self.io.write_all(&wire)).await {
            Err(_) => Err(ChannelError::Timeout),
            Ok(Err(e)) => {
                self.closed = true;
                Err(ChannelError::Io(e))
            }
            Ok(Ok(())) => {
                debug!(
                    command = ?command,
                    chunk_current,
                    chunk_total,
                    bytes = plaintext.len(),
                    "sent message"
                );
                Ok(())
            }
        }
    }

    /// Send an ACK for a specific chunk index.
    pub async fn send_ack(&mut self, acked: u32) -> Result<(), ChannelError> {
        let nonce = self.next_nonce()?;
        let header = MessageHeader {
            command: CommandCode::Ack,
            payload_length: TAG_LEN as u32,
            chunk_current: acked,
            chunk_total: 0,
            nonce,
        };
        let ciphertext = self
            .seal
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &[],
                    aad: &header.aad(),
                },
            )
            .map_err(|_| ChannelError::Closed)?;
        let wire = self.codec.encode(&header, &ciphertext)?;
        match tokio::time::timeout(self.config.timeout, self.io.write_all(&wire)).await {
            Err(_) => Err(ChannelError::Timeout),
            Ok(Err(e)) => {
                self.closed = true;
                Err(ChannelError::Io(e))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Send a typed ERROR response.
    pub async fn send_error(&mut self, details: &ErrorDetails) -> Result<(), ChannelError> {
        let bytes = payload::to_bytes(details)?;
        self.send(CommandCode::Error, 0, 0, &bytes).await
    }

    /// Receive and open the next message, using the channel's default
    /// deadline.
    ///
    /// The returned header's `payload_length` is rewritten to the
    /// plaintext length.
    pub async fn recv(&mut self) -> Result<(MessageHeader, Bytes), ChannelError> {
        self.recv_with_timeout(self.config.timeout).await
    }

    /// Receive with an explicit deadline, for callers tracking their own
    /// wait budget (the transfer engine's ACK waits).
    pub async fn recv_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<(MessageHeader, Bytes), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let (header, ciphertext) = match tokio::time::timeout(timeout, self.read_message()).await {
            Err(_) => return Err(ChannelError::Timeout),
            Ok(result) => result?,
        };

        if header.nonce[..SALT_LEN] != self.recv_salt {
            // Message not sealed for our direction (reflection or cross-talk).
            return self.auth_failure("nonce salt mismatch");
        }

        let plaintext = match self.open.decrypt(
            XNonce::from_slice(&header.nonce),
            Payload {
                msg: &ciphertext,
                aad: &header.aad(),
            },
        ) {
            Ok(pt) => pt,
            Err(_) => return self.auth_failure("bad authentication tag"),
        };

        self.auth_failures = 0;
        let mut header = header;
        header.payload_length = plaintext.len() as u32;
        Ok((header, Bytes::from(plaintext)))
    }

    /// Consume the underlying stream, discarding channel state.
    pub fn into_inner(self) -> S {
        self.io
    }

    async fn read_message(&mut self) -> Result<(MessageHeader, Vec<u8>), ChannelError> {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = self.io.read_exact(&mut header_buf).await {
            self.closed = true;
            return Err(ChannelError::Io(e));
        }

        let header = match self.codec.decode_header(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                self.closed = true;
                return Err(ChannelError::Decode(e));
            }
        };

        let mut ciphertext = vec![0u8; header.payload_length as usize];
        if let Err(e) = self.io.read_exact(&mut ciphertext).await {
            self.closed = true;
            return Err(ChannelError::Io(e));
        }
        Ok((header, ciphertext))
    }

    fn next_nonce(&mut self) -> Result<[u8; NONCE_LEN], ChannelError> {
        // Counter exhaustion would mean nonce reuse; close instead.
        let counter = self.send_counter;
        self.send_counter = counter.checked_add(1).ok_or(ChannelError::Closed)?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..SALT_LEN].copy_from_slice(&self.send_salt);
        nonce[SALT_LEN..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }

    fn auth_failure<T>(&mut self, reason: &str) -> Result<T, ChannelError> {
        self.auth_failures += 1;
        warn!(
            reason,
            failures = self.auth_failures,
            "message failed authentication"
        );
        if self.auth_failures >= self.config.max_auth_failures {
            warn!("authentication failure threshold reached, closing channel");
            self.closed = true;
        }
        Err(ChannelError::Auth)
    }
}
