use crate::error::ClientError;
use ferrolink_channel::{ChannelConfig, SecureChannel};
use ferrolink_proto::payload::{self, ErrorDetails, ExecOutput, ExecRequest, GetRequest, LoadRequest};
use ferrolink_proto::CommandCode;
use ferrolink_transfer::{receive_file, send_file, ReceivedFile, TransferConfig};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent address
    pub addr: SocketAddr,
    /// Connection attempts before giving up (default: 3)
    pub connect_attempts: u32,
    /// Pause between connection attempts
    pub retry_delay: Duration,
    /// Secure channel settings
    pub channel: ChannelConfig,
    /// Transfer engine settings
    pub transfer: TransferConfig,
}

impl ClientConfig {
    /// Defaults for the given agent address.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_attempts: 3,
            retry_delay: Duration::from_secs(1),
            channel: ChannelConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

/// A client session with one agent.
///
/// Operations run sequentially over a single encrypted channel; each
/// returns once the agent has acknowledged or answered.
pub struct Client<S = TcpStream> {
    channel: SecureChannel<S>,
    transfer: TransferConfig,
}

impl Client<TcpStream> {
    /// Dial the agent, retrying the configured number of times.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let mut last = String::from("no attempts made");
        for attempt in 1..=config.connect_attempts {
            if attempt > 1 {
                tokio::time::sleep(config.retry_delay).await;
            }
            match TcpStream::connect(config.addr).await {
                Ok(stream) => {
                    match SecureChannel::connect(stream, config.channel.clone()).await {
                        Ok(channel) => {
                            info!(addr = %config.addr, "connected to agent");
                            return Ok(Self {
                                channel,
                                transfer: config.transfer,
                            });
                        }
                        Err(e) => {
                            warn!(addr = %config.addr, attempt, error = %e, "handshake failed");
                            last = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    warn!(addr = %config.addr, attempt, error = %e, "connection failed");
                    last = e.to_string();
                }
            }
        }
        Err(ClientError::ConnectFailed {
            attempts: config.connect_attempts,
            last,
        })
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-established channel.
    pub fn from_channel(channel: SecureChannel<S>, transfer: TransferConfig) -> Self {
        Self { channel, transfer }
    }

    /// Upload a local file to `remote` under the agent's root.
    pub async fn put(&mut self, local: &Path, remote: &str) -> Result<(), ClientError> {
        send_file(&mut self.channel, &self.transfer, CommandCode::Put, local, remote).await?;
        Ok(())
    }

    /// Download `remote` from the agent into a local file.
    pub async fn get(&mut self, remote: &str, local: &Path) -> Result<ReceivedFile, ClientError> {
        let request = payload::to_bytes(&GetRequest {
            path: remote.to_owned(),
        })?;
        self.channel.send(CommandCode::Get, 0, 0, &request).await?;
        Ok(receive_file(&mut self.channel, &self.transfer, CommandCode::Get, local).await?)
    }

    /// Load module code on the agent under `identifier`.
    ///
    /// The code's digest travels with the request; the agent refuses to
    /// activate code that does not match it.
    pub async fn load(&mut self, identifier: &str, code: Vec<u8>) -> Result<(), ClientError> {
        let sha256: [u8; 32] = Sha256::digest(&code).into();
        let request = payload::to_bytes(&LoadRequest {
            identifier: identifier.to_owned(),
            sha256,
            code,
        })?;
        self.channel.send(CommandCode::Load, 0, 0, &request).await?;

        let (header, body) = self.channel.recv().await?;
        match header.command {
            CommandCode::Ack => Ok(()),
            CommandCode::Error => Err(agent_error(&body)?),
            _ => Err(ClientError::Protocol("unexpected response to load")),
        }
    }

    /// Run a loaded module on the agent.
    pub async fn execute(
        &mut self,
        identifier: &str,
        args: Vec<String>,
    ) -> Result<ExecOutput, ClientError> {
        let request = payload::to_bytes(&ExecRequest {
            identifier: identifier.to_owned(),
            args,
        })?;
        self.channel.send(CommandCode::Do, 0, 0, &request).await?;

        let (header, body) = self.channel.recv().await?;
        match header.command {
            CommandCode::Do => Ok(payload::from_bytes(&body)?),
            CommandCode::Error => Err(agent_error(&body)?),
            _ => Err(ClientError::Protocol("unexpected response to execute")),
        }
    }
}

fn agent_error(body: &[u8]) -> Result<ClientError, ClientError> {
    let details: ErrorDetails = payload::from_bytes(body)?;
    Ok(ClientError::Agent {
        kind: details.kind,
        message: details.message,
    })
}
