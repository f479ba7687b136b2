use crate::error::AgentError;
use crate::sandbox;
use bytes::Bytes;
use ferrolink_channel::{ChannelError, SecureChannel};
use ferrolink_module::{ModuleError, ModuleManager};
use ferrolink_proto::payload::{
    self, ChunkData, ErrorDetails, ExecOutput, ExecRequest, GetRequest, LoadRequest,
    TransferFinish,
};
use ferrolink_proto::{CommandCode, ErrorKind, MessageHeader};
use ferrolink_transfer::{
    receive_file_resumed, send_file, ActiveTransfers, Direction, TransferConfig, TransferError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Routes commands arriving on one connection.
///
/// Request failures are reported to the peer as ERROR messages and the
/// connection keeps serving; only channel level failures end it.
pub struct Dispatcher {
    root: PathBuf,
    transfer: TransferConfig,
    manager: Arc<ModuleManager>,
    transfers: ActiveTransfers,
}

impl Dispatcher {
    /// Build a dispatcher serving files under `root` and modules from
    /// `manager`.
    pub fn new(root: PathBuf, transfer: TransferConfig, manager: Arc<ModuleManager>) -> Self {
        Self {
            root,
            transfer,
            manager,
            transfers: ActiveTransfers::new(),
        }
    }

    /// Share an active transfer registry with other connections.
    pub fn with_transfers(mut self, transfers: ActiveTransfers) -> Self {
        self.transfers = transfers;
        self
    }

    /// Serve the connection until the peer hangs up.
    pub async fn serve<S>(&self, channel: &mut SecureChannel<S>) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let (header, body) = match channel.recv().await {
                Ok(message) => message,
                // An idle connection is kept open.
                Err(ChannelError::Timeout) => continue,
                // Unauthenticated messages are dropped; the channel
                // closes itself past the failure threshold.
                Err(ChannelError::Auth) => continue,
                Err(ChannelError::Closed) => return Ok(()),
                Err(ChannelError::Io(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            match header.command {
                CommandCode::Put => self.handle_put(channel, header, body).await?,
                CommandCode::Get => self.handle_get(channel, &body).await?,
                CommandCode::Load => self.handle_load(channel, &body).await?,
                CommandCode::Do => self.handle_do(channel, &body).await?,
                CommandCode::Ack | CommandCode::Error => {
                    debug!(command = ?header.command, "ignoring stray control message");
                }
            }
        }
    }

    async fn handle_put<S>(
        &self,
        channel: &mut SecureChannel<S>,
        header: MessageHeader,
        body: Bytes,
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // The first message names the path: a data chunk normally, the
        // finish message for a zero-byte file.
        let path = if header.is_control() {
            payload::from_bytes::<TransferFinish>(&body).map(|f| f.path)
        } else {
            payload::from_bytes::<ChunkData>(&body).map(|c| c.path)
        };
        let path = match path {
            Ok(path) => path,
            Err(e) => {
                return self
                    .reject(channel, ErrorKind::InvalidRequest, &format!("bad transfer payload: {e}"))
                    .await;
            }
        };
        let Some(dest) = sandbox::resolve(&self.root, &path) else {
            return self
                .reject(channel, ErrorKind::InvalidRequest, "path escapes the transfer root")
                .await;
        };
        let _permit = match self.transfers.begin(Direction::Inbound, &path) {
            Ok(permit) => permit,
            Err(_) => {
                return self
                    .reject(channel, ErrorKind::TransferActive, "transfer already active for path")
                    .await;
            }
        };

        info!(path = %path, "inbound transfer starting");
        match receive_file_resumed(
            channel,
            &self.transfer,
            CommandCode::Put,
            &dest,
            Some((header, body)),
        )
        .await
        {
            Ok(received) => {
                info!(path = %path, size = received.size, "inbound transfer stored");
                Ok(())
            }
            Err(e) => self.transfer_failed(channel, &path, e).await,
        }
    }

    async fn handle_get<S>(
        &self,
        channel: &mut SecureChannel<S>,
        body: &[u8],
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request: GetRequest = match payload::from_bytes(body) {
            Ok(request) => request,
            Err(e) => {
                return self
                    .reject(channel, ErrorKind::InvalidRequest, &format!("bad get request: {e}"))
                    .await;
            }
        };
        let Some(src) = sandbox::resolve(&self.root, &request.path) else {
            return self
                .reject(channel, ErrorKind::InvalidRequest, "path escapes the transfer root")
                .await;
        };
        if tokio::fs::metadata(&src).await.is_err() {
            return self
                .reject(channel, ErrorKind::NotFound, &format!("no such file: {}", request.path))
                .await;
        }
        let _permit = match self.transfers.begin(Direction::Outbound, &request.path) {
            Ok(permit) => permit,
            Err(_) => {
                return self
                    .reject(channel, ErrorKind::TransferActive, "transfer already active for path")
                    .await;
            }
        };

        info!(path = %request.path, "outbound transfer starting");
        match send_file(channel, &self.transfer, CommandCode::Get, &src, &request.path).await {
            Ok(()) => Ok(()),
            Err(e) => self.transfer_failed(channel, &request.path, e).await,
        }
    }

    async fn handle_load<S>(
        &self,
        channel: &mut SecureChannel<S>,
        body: &[u8],
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request: LoadRequest = match payload::from_bytes(body) {
            Ok(request) => request,
            Err(e) => {
                return self
                    .reject(channel, ErrorKind::InvalidRequest, &format!("bad load request: {e}"))
                    .await;
            }
        };
        match self
            .manager
            .load(&request.identifier, &request.sha256, &request.code)
            .await
        {
            Ok(()) => {
                channel.send_ack(0).await?;
                Ok(())
            }
            Err(e) => {
                self.reject(channel, module_error_kind(&e), &e.to_string())
                    .await
            }
        }
    }

    async fn handle_do<S>(
        &self,
        channel: &mut SecureChannel<S>,
        body: &[u8],
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request: ExecRequest = match payload::from_bytes(body) {
            Ok(request) => request,
            Err(e) => {
                return self
                    .reject(channel, ErrorKind::InvalidRequest, &format!("bad exec request: {e}"))
                    .await;
            }
        };
        match self.manager.execute(&request.identifier, &request.args).await {
            Ok(outcome) => {
                let response = payload::to_bytes(&ExecOutput {
                    output: outcome.output,
                    duration_ms: outcome.duration.as_millis() as u64,
                })?;
                channel.send(CommandCode::Do, 0, 0, &response).await?;
                Ok(())
            }
            Err(e) => {
                self.reject(channel, module_error_kind(&e), &e.to_string())
                    .await
            }
        }
    }

    /// Classify a failed transfer: channel failures end the connection,
    /// everything else is logged and serving continues. Integrity and
    /// size violations were already reported in-band by the transfer
    /// engine.
    async fn transfer_failed<S>(
        &self,
        channel: &mut SecureChannel<S>,
        path: &str,
        err: TransferError,
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match err {
            TransferError::Channel(e) => Err(e.into()),
            TransferError::Io(e) => {
                warn!(path = %path, error = %e, "transfer failed on local filesystem");
                self.reject(channel, ErrorKind::Internal, "filesystem error")
                    .await
            }
            e => {
                warn!(path = %path, error = %e, "transfer failed");
                Ok(())
            }
        }
    }

    async fn reject<S>(
        &self,
        channel: &mut SecureChannel<S>,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        warn!(?kind, message = %message, "rejecting request");
        match channel.send_error(&ErrorDetails::new(kind, message)).await {
            Ok(()) | Err(ChannelError::Timeout) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn module_error_kind(err: &ModuleError) -> ErrorKind {
    match err {
        ModuleError::NotLoaded(_) => ErrorKind::NotLoaded,
        ModuleError::Busy(_) => ErrorKind::Busy,
        ModuleError::Integrity(_) => ErrorKind::Integrity,
        ModuleError::RegistryFull { .. } | ModuleError::Load(_) => ErrorKind::LoadFailed,
        ModuleError::Exec(_) => ErrorKind::ExecFailed,
        ModuleError::Timeout { .. } => ErrorKind::Timeout,
    }
}
