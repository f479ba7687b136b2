use crate::error::TransferError;
use crate::TransferConfig;
use ferrolink_channel::{ChannelError, SecureChannel};
use ferrolink_proto::payload::{self, ChunkData, ErrorDetails, TransferFinish};
use ferrolink_proto::{CommandCode, ErrorKind};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum AckWait {
    Acked,
    TimedOut,
}

/// Stream a local file to the peer as numbered chunks.
///
/// `command` selects the wire direction: [`CommandCode::Put`] when a
/// client uploads, [`CommandCode::Get`] when an agent answers a
/// download request. Every chunk is resent until acknowledged or the
/// retry budget runs out; a digest mismatch reported by the receiver is
/// terminal and never retried.
pub async fn send_file<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    command: CommandCode,
    local_path: &Path,
    remote_path: &str,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let meta = tokio::fs::metadata(local_path).await?;
    let size = meta.len();
    if size > config.max_file_size {
        return Err(TransferError::TooLarge {
            size,
            max: config.max_file_size,
        });
    }

    let chunk_total = size.div_ceil(config.chunk_size as u64);
    let chunk_total = u32::try_from(chunk_total).map_err(|_| TransferError::TooLarge {
        size,
        max: config.max_file_size,
    })?;

    info!(
        path = remote_path,
        size, chunk_total, "starting outbound transfer"
    );

    let mut file = tokio::fs::File::open(local_path).await?;
    let mut hasher = Sha256::new();

    for chunk_current in 0..chunk_total {
        let data = read_chunk(&mut file, config.chunk_size).await?;
        hasher.update(&data);
        let body = payload::to_bytes(&ChunkData {
            path: remote_path.to_owned(),
            data,
        })?;
        send_with_retries(
            channel,
            config,
            command,
            chunk_current,
            chunk_total,
            &body,
            chunk_current,
            remote_path,
        )
        .await?;
    }

    // Finish message: chunk_total of 0 marks it as control, and it is
    // the only message of a zero-byte transfer. Its acknowledgement
    // carries the data chunk count.
    let finish = payload::to_bytes(&TransferFinish {
        path: remote_path.to_owned(),
        size,
        sha256: hasher.finalize().into(),
    })?;
    send_with_retries(channel, config, command, 0, 0, &finish, chunk_total, remote_path).await?;

    info!(path = remote_path, size, "outbound transfer complete");
    Ok(())
}

/// Fill up to `chunk_size` bytes from the file.
async fn read_chunk(
    file: &mut tokio::fs::File,
    chunk_size: usize,
) -> Result<Vec<u8>, TransferError> {
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[allow(clippy::too_many_arguments)]
async fn send_with_retries<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    command: CommandCode,
    chunk_current: u32,
    chunk_total: u32,
    body: &[u8],
    expected_ack: u32,
    remote_path: &str,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let attempts = config.max_retries.saturating_add(1);
    for attempt in 0..attempts {
        if attempt > 0 {
            warn!(
                path = remote_path,
                chunk = chunk_current,
                attempt,
                "resending unacknowledged chunk"
            );
        }
        channel.send(command, chunk_current, chunk_total, body).await?;
        match await_ack(channel, config, expected_ack, remote_path).await? {
            AckWait::Acked => return Ok(()),
            AckWait::TimedOut => continue,
        }
    }
    Err(TransferError::RetriesExhausted {
        chunk: chunk_current,
        attempts,
    })
}

/// Wait until the deadline for the expected acknowledgement, discarding
/// stale acknowledgements from earlier resends along the way.
async fn await_ack<S>(
    channel: &mut SecureChannel<S>,
    config: &TransferConfig,
    expected: u32,
    remote_path: &str,
) -> Result<AckWait, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Instant::now() + config.ack_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(AckWait::TimedOut);
        }
        let (header, body) = match channel.recv_with_timeout(remaining).await {
            Ok(message) => message,
            Err(ChannelError::Timeout) => return Ok(AckWait::TimedOut),
            // A single unauthenticated frame is dropped like a stale
            // acknowledgement; the channel closes itself past the
            // failure threshold.
            Err(ChannelError::Auth) => {
                debug!(path = remote_path, "discarding unauthenticated frame");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match header.command {
            CommandCode::Ack if header.chunk_current == expected => return Ok(AckWait::Acked),
            CommandCode::Ack => {
                debug!(
                    got = header.chunk_current,
                    expected, "discarding stale acknowledgement"
                );
            }
            CommandCode::Error => {
                let details: ErrorDetails = payload::from_bytes(&body)?;
                return Err(match details.kind {
                    ErrorKind::Integrity => TransferError::Integrity {
                        path: remote_path.to_owned(),
                    },
                    kind => TransferError::Peer {
                        kind,
                        message: details.message,
                    },
                });
            }
            _ => {
                return Err(TransferError::Protocol(
                    "unexpected message while awaiting acknowledgement",
                ))
            }
        }
    }
}
