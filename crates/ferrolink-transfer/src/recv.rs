use crate::error::TransferError;
use crate::TransferConfig;
use ferrolink_channel::SecureChannel;
use ferrolink_proto::payload::{self, ChunkData, ErrorDetails, TransferFinish};
use bytes::Bytes;
use ferrolink_proto::{CommandCode, ErrorKind, MessageHeader};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Outcome of a completed inbound transfer.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Remote path the sender named in the finish message
    pub path: String,
    /// Total bytes written
    pub size: u64,
    /// Verified digest of the file contents
    pub sha256: [u8; 32],
}

/// Receive a chunked file into `dest`.
///
/// Chunks land in a `<dest>.part` sidecar which is renamed into place
/// only after the finish message's digest matches the received bytes.
/// On any failure the sidecar is removed, so a half-written file never
/// masquerades as a complete one.
///
/// Duplicate or out-of-order chunks do not advance the transfer; the
/// last received index is re-acknowledged so the sender can resync.
pub async fn receive_file<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    command: CommandCode,
    dest: &Path,
) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    receive_file_resumed(channel, config, command, dest, None).await
}

/// Like [`receive_file`], but starting from a message the caller has
/// already read off the channel. Used by dispatchers that peek at the
/// first chunk to learn the transfer's path.
pub async fn receive_file_resumed<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    command: CommandCode,
    dest: &Path,
    first: Option<(MessageHeader, Bytes)>,
) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let part = part_path(dest);
    let result = receive_into(channel, config, command, dest, &part, first).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    result
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn receive_into<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    command: CommandCode,
    dest: &Path,
    part: &Path,
    mut pending: Option<(MessageHeader, Bytes)>,
) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::File::create(part).await?;
    let mut hasher = Sha256::new();
    let mut expected: u32 = 0;
    let mut total: Option<u32> = None;
    let mut written: u64 = 0;
    // The idle deadline must outlast the sender's full resend budget
    // for a single chunk.
    let idle = config.recv_idle_timeout();

    loop {
        let (header, body) = match pending.take() {
            Some(message) => message,
            None => channel.recv_with_timeout(idle).await?,
        };
        if header.command == CommandCode::Error {
            let details: ErrorDetails = payload::from_bytes(&body)?;
            return Err(TransferError::Peer {
                kind: details.kind,
                message: details.message,
            });
        }
        if header.command != command {
            return Err(TransferError::Protocol("unexpected command during transfer"));
        }

        if header.is_control() {
            let finish: TransferFinish = payload::from_bytes(&body)?;
            // A non-empty transfer delivers at least one chunk before
            // its finish. A finish alone is the resend of an already
            // completed transfer whose final ack was lost, not a
            // corrupt file.
            if total.is_none() && finish.size != 0 {
                warn!(path = %finish.path, "finish message with no preceding chunks");
                channel
                    .send_error(&ErrorDetails::new(
                        ErrorKind::InvalidRequest,
                        "finish message with no preceding chunks",
                    ))
                    .await?;
                return Err(TransferError::Protocol("finish without chunks"));
            }
            let digest: [u8; 32] = hasher.finalize().into();
            if digest != finish.sha256 || written != finish.size {
                warn!(
                    path = %finish.path,
                    written,
                    expected_size = finish.size,
                    "inbound transfer failed integrity verification"
                );
                channel
                    .send_error(&ErrorDetails::new(ErrorKind::Integrity, "digest mismatch"))
                    .await?;
                return Err(TransferError::Integrity { path: finish.path });
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(part, dest).await?;
            channel.send_ack(expected).await?;
            info!(path = %finish.path, size = written, "inbound transfer complete");
            return Ok(ReceivedFile {
                path: finish.path,
                size: written,
                sha256: digest,
            });
        }

        match total {
            None => total = Some(header.chunk_total),
            Some(t) if t != header.chunk_total => {
                return Err(TransferError::Protocol("chunk count changed mid-transfer"));
            }
            Some(_) => {}
        }

        if header.chunk_current == expected {
            let chunk: ChunkData = payload::from_bytes(&body)?;
            file.write_all(&chunk.data).await?;
            hasher.update(&chunk.data);
            written += chunk.data.len() as u64;
            if written > config.max_file_size {
                channel
                    .send_error(&ErrorDetails::new(ErrorKind::TooLarge, "file exceeds size limit"))
                    .await?;
                return Err(TransferError::TooLarge {
                    size: written,
                    max: config.max_file_size,
                });
            }
            channel.send_ack(expected).await?;
            expected += 1;
        } else {
            // Duplicate or gap: do not advance, just restate where we are.
            debug!(
                got = header.chunk_current,
                expected, "re-acknowledging out-of-sequence chunk"
            );
            if expected > 0 {
                channel.send_ack(expected - 1).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send::send_file;
    use crate::test_util::{channel_pair, write_temp_file};
    use std::time::Duration;

    fn quick_config() -> TransferConfig {
        TransferConfig {
            chunk_size: 4,
            ack_timeout: Duration::from_millis(100),
            max_retries: 3,
            ..Default::default()
        }
    }

    fn digest_of(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[tokio::test]
    async fn end_to_end_roundtrip() {
        let (mut sender, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let src = write_temp_file(&dir, "src.bin", b"the quick brown fox");
        let dest = dir.path().join("dest.bin");
        let config = quick_config();

        let send_config = config.clone();
        let send_task = tokio::spawn(async move {
            send_file(&mut sender, &send_config, CommandCode::Put, &src, "src.bin").await
        });

        let received = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        assert_eq!(received.path, "src.bin");
        assert_eq!(received.size, 19);
        assert_eq!(received.sha256, digest_of(b"the quick brown fox"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"the quick brown fox");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn zero_byte_file() {
        let (mut sender, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let src = write_temp_file(&dir, "empty.bin", b"");
        let dest = dir.path().join("empty-out.bin");
        let config = quick_config();

        let send_config = config.clone();
        let send_task = tokio::spawn(async move {
            send_file(&mut sender, &send_config, CommandCode::Put, &src, "empty.bin").await
        });

        let received = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();

        assert_eq!(received.size, 0);
        assert_eq!(std::fs::read(&dest).unwrap(), b"");
    }

    #[tokio::test]
    async fn duplicate_chunk_does_not_advance() {
        let (mut peer, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dup.bin");
        let config = quick_config();

        let peer_task = tokio::spawn(async move {
            let chunk0 = payload::to_bytes(&ChunkData {
                path: "dup.bin".into(),
                data: b"abcd".to_vec(),
            })
            .unwrap();
            let chunk1 = payload::to_bytes(&ChunkData {
                path: "dup.bin".into(),
                data: b"ef".to_vec(),
            })
            .unwrap();
            let finish = payload::to_bytes(&TransferFinish {
                path: "dup.bin".into(),
                size: 6,
                sha256: Sha256::digest(b"abcdef").into(),
            })
            .unwrap();

            peer.send(CommandCode::Put, 0, 2, &chunk0).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.chunk_current, 0);

            // Resend of chunk 0: re-acknowledged, not re-written.
            peer.send(CommandCode::Put, 0, 2, &chunk0).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.chunk_current, 0);

            peer.send(CommandCode::Put, 1, 2, &chunk1).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.chunk_current, 1);

            peer.send(CommandCode::Put, 0, 0, &finish).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.command, CommandCode::Ack);
            assert_eq!(h.chunk_current, 2);
        });

        let received = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap();
        peer_task.await.unwrap();

        assert_eq!(received.size, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn digest_mismatch_rejects_file() {
        let (mut peer, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bad.bin");
        let config = quick_config();

        let peer_task = tokio::spawn(async move {
            let chunk0 = payload::to_bytes(&ChunkData {
                path: "bad.bin".into(),
                data: b"abcd".to_vec(),
            })
            .unwrap();
            let finish = payload::to_bytes(&TransferFinish {
                path: "bad.bin".into(),
                size: 4,
                sha256: [0u8; 32],
            })
            .unwrap();

            peer.send(CommandCode::Put, 0, 1, &chunk0).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.chunk_current, 0);

            peer.send(CommandCode::Put, 0, 0, &finish).await.unwrap();
            let (h, body) = peer.recv().await.unwrap();
            assert_eq!(h.command, CommandCode::Error);
            let details: ErrorDetails = payload::from_bytes(&body).unwrap();
            assert_eq!(details.kind, ErrorKind::Integrity);
        });

        let err = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap_err();
        peer_task.await.unwrap();

        assert!(matches!(err, TransferError::Integrity { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn stray_finish_is_not_an_integrity_failure() {
        let (mut peer, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("done.bin");
        let config = quick_config();

        let peer_task = tokio::spawn(async move {
            // The finish of a completed transfer, resent because its
            // ack was lost.
            let finish = payload::to_bytes(&TransferFinish {
                path: "done.bin".into(),
                size: 4,
                sha256: Sha256::digest(b"abcd").into(),
            })
            .unwrap();
            peer.send(CommandCode::Put, 0, 0, &finish).await.unwrap();

            let (h, body) = peer.recv().await.unwrap();
            assert_eq!(h.command, CommandCode::Error);
            let details: ErrorDetails = payload::from_bytes(&body).unwrap();
            assert_eq!(details.kind, ErrorKind::InvalidRequest);
        });

        let err = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap_err();
        peer_task.await.unwrap();

        assert!(matches!(err, TransferError::Protocol(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn inbound_size_limit_enforced() {
        let (mut peer, mut receiver) = channel_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.bin");
        let config = TransferConfig {
            max_file_size: 3,
            ..quick_config()
        };

        let peer_task = tokio::spawn(async move {
            let chunk0 = payload::to_bytes(&ChunkData {
                path: "big.bin".into(),
                data: b"abcd".to_vec(),
            })
            .unwrap();
            peer.send(CommandCode::Put, 0, 1, &chunk0).await.unwrap();
            let (h, _) = peer.recv().await.unwrap();
            assert_eq!(h.command, CommandCode::Error);
        });

        let err = receive_file(&mut receiver, &config, CommandCode::Put, &dest)
            .await
            .unwrap_err();
        peer_task.await.unwrap();
        assert!(matches!(err, TransferError::TooLarge { .. }));
        assert!(!part_path(&dest).exists());
    }
}
