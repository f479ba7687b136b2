//! Ephemeral key exchange and session key derivation
//!
//! Exactly one round trip before any command is accepted: each side sends
//! its 32-byte ephemeral X25519 public key followed by a 16-byte random
//! direction salt. Both sides then derive one key per direction with
//! HKDF-SHA256 over the shared secret.

use crate::error::ChannelError;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the per-direction salt embedded in every nonce.
pub const SALT_LEN: usize = 16;

/// Bytes each side sends during the handshake: public key plus salt.
pub const HELLO_LEN: usize = 32 + SALT_LEN;

const HKDF_INFO: &[u8] = b"ferrolink v1 session keys";

/// Derived key material for one established channel.
///
/// Keys are wiped from memory on drop.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// AEAD key for messages we send
    pub send_key: [u8; 32],
    /// AEAD key for messages we receive
    pub recv_key: [u8; 32],
    /// Salt prefixing every nonce we send
    pub send_salt: [u8; SALT_LEN],
    /// Salt the peer prefixes to every nonce it sends
    pub recv_salt: [u8; SALT_LEN],
}

/// Run the initiating (client) side of the handshake.
pub async fn initiate<S>(io: &mut S, timeout: Duration) -> Result<SessionKeys, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (secret, hello, our_salt) = local_hello();
    write_hello(io, &hello, timeout).await?;
    let (their_public, their_salt) = read_hello(io, timeout).await?;
    derive_keys(secret, &their_public, our_salt, their_salt, true)
}

/// Run the accepting (agent) side of the handshake.
pub async fn accept<S>(io: &mut S, timeout: Duration) -> Result<SessionKeys, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (secret, hello, our_salt) = local_hello();
    let (their_public, their_salt) = read_hello(io, timeout).await?;
    write_hello(io, &hello, timeout).await?;
    derive_keys(secret, &their_public, our_salt, their_salt, false)
}

fn local_hello() -> (EphemeralSecret, [u8; HELLO_LEN], [u8; SALT_LEN]) {
    let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let mut hello = [0u8; HELLO_LEN];
    hello[..32].copy_from_slice(public.as_bytes());
    hello[32..].copy_from_slice(&salt);
    (secret, hello, salt)
}

async fn write_hello<S>(
    io: &mut S,
    hello: &[u8; HELLO_LEN],
    timeout: Duration,
) -> Result<(), ChannelError>
where
    S: AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, io.write_all(hello)).await {
        Err(_) => Err(ChannelError::Timeout),
        Ok(Err(e)) => Err(ChannelError::Handshake(format!("write failed: {e}"))),
        Ok(Ok(())) => Ok(()),
    }
}

async fn read_hello<S>(
    io: &mut S,
    timeout: Duration,
) -> Result<(PublicKey, [u8; SALT_LEN]), ChannelError>
where
    S: AsyncRead + Unpin,
{
    let mut hello = [0u8; HELLO_LEN];
    match tokio::time::timeout(timeout, io.read_exact(&mut hello)).await {
        Err(_) => return Err(ChannelError::Timeout),
        Ok(Err(e)) => {
            return Err(ChannelError::Handshake(format!("short key material: {e}")));
        }
        Ok(Ok(_)) => {}
    }

    let mut public_bytes = [0u8; 32];
    public_bytes.copy_from_slice(&hello[..32]);
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&hello[32..]);
    Ok((PublicKey::from(public_bytes), salt))
}

fn derive_keys(
    secret: EphemeralSecret,
    their_public: &PublicKey,
    our_salt: [u8; SALT_LEN],
    their_salt: [u8; SALT_LEN],
    initiator: bool,
) -> Result<SessionKeys, ChannelError> {
    let shared = secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(ChannelError::Handshake(
            "non-contributory peer public key".to_string(),
        ));
    }

    // Both directions derive from the same salt ordering: initiator first.
    let mut hkdf_salt = [0u8; SALT_LEN * 2];
    if initiator {
        hkdf_salt[..SALT_LEN].copy_from_slice(&our_salt);
        hkdf_salt[SALT_LEN..].copy_from_slice(&their_salt);
    } else {
        hkdf_salt[..SALT_LEN].copy_from_slice(&their_salt);
        hkdf_salt[SALT_LEN..].copy_from_slice(&our_salt);
    }

    let hk = Hkdf::<Sha256>::new(Some(&hkdf_salt), shared.as_bytes());
    let mut okm = [0u8; 64];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| ChannelError::Handshake("key derivation failed".to_string()))?;

    let mut initiator_key = [0u8; 32];
    let mut acceptor_key = [0u8; 32];
    initiator_key.copy_from_slice(&okm[..32]);
    acceptor_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    let keys = if initiator {
        SessionKeys {
            send_key: initiator_key,
            recv_key: acceptor_key,
            send_salt: our_salt,
            recv_salt: their_salt,
        }
    } else {
        SessionKeys {
            send_key: acceptor_key,
            recv_key: initiator_key,
            send_salt: our_salt,
            recv_salt: their_salt,
        }
    };
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn handshake_derives_complementary_keys() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1024);
        let timeout = Duration::from_secs(1);

        let server = tokio::spawn(async move { accept(&mut server_io, timeout).await });
        let client_keys = initiate(&mut client_io, timeout).await.unwrap();
        let server_keys = server.await.unwrap().unwrap();

        assert_eq!(client_keys.send_key, server_keys.recv_key);
        assert_eq!(client_keys.recv_key, server_keys.send_key);
        assert_eq!(client_keys.send_salt, server_keys.recv_salt);
        assert_eq!(client_keys.recv_salt, server_keys.send_salt);
        assert_ne!(client_keys.send_key, client_keys.recv_key);
    }

    #[tokio::test]
    async fn short_key_material_fails_handshake() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1024);
        let timeout = Duration::from_secs(1);

        // Peer sends 10 bytes and hangs up.
        tokio::spawn(async move {
            server_io.write_all(&[0u8; 10]).await.unwrap();
            drop(server_io);
        });

        let err = initiate(&mut client_io, timeout).await.unwrap_err();
        assert!(matches!(err, ChannelError::Handshake(_)));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (mut client_io, _server_io) = tokio::io::duplex(1024);
        let err = initiate(&mut client_io, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[tokio::test]
    async fn sessions_use_fresh_key_material() {
        let timeout = Duration::from_secs(1);
        let mut keys = Vec::new();
        for _ in 0..2 {
            let (mut client_io, mut server_io) = tokio::io::duplex(1024);
            let server = tokio::spawn(async move { accept(&mut server_io, timeout).await });
            let client_keys = initiate(&mut client_io, timeout).await.unwrap();
            server.await.unwrap().unwrap();
            keys.push(client_keys.send_key);
        }
        assert_ne!(keys[0], keys[1]);
    }
}
