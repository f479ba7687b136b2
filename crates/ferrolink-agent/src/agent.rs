use crate::dispatcher::Dispatcher;
use crate::error::AgentError;
use ferrolink_channel::{ChannelConfig, SecureChannel};
use ferrolink_module::{ModuleManager, WasmConfig, WasmLoader, DEFAULT_CAPACITY};
use ferrolink_transfer::{ActiveTransfers, TransferConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Agent runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Address to accept connections on
    pub listen_addr: SocketAddr,
    /// Directory all transferred files live under
    pub root_dir: PathBuf,
    /// Secure channel settings
    pub channel: ChannelConfig,
    /// Transfer engine settings
    pub transfer: TransferConfig,
    /// WebAssembly execution limits
    pub wasm: WasmConfig,
    /// Module registry slot count
    pub module_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 4815).into(),
            root_dir: PathBuf::from("."),
            channel: ChannelConfig::default(),
            transfer: TransferConfig::default(),
            wasm: WasmConfig::default(),
            module_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Accepts connections and serves each one on its own task.
///
/// The module registry and the active transfer registry are shared
/// across connections; everything else is per connection.
pub struct Agent {
    config: AgentConfig,
    manager: Arc<ModuleManager>,
    transfers: ActiveTransfers,
}

impl Agent {
    /// Build the agent and its module runtime.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let loader = Arc::new(WasmLoader::new(config.wasm.clone())?);
        let manager = Arc::new(ModuleManager::with_capacity(loader, config.module_capacity));
        Ok(Self {
            config,
            manager,
            transfers: ActiveTransfers::new(),
        })
    }

    /// Listen and serve until the process is stopped.
    pub async fn run(&self) -> Result<(), AgentError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, root = %self.config.root_dir.display(), "agent listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "connection accepted");

            let dispatcher = Dispatcher::new(
                self.config.root_dir.clone(),
                self.config.transfer.clone(),
                self.manager.clone(),
            )
            .with_transfers(self.transfers.clone());
            let channel_config = self.config.channel.clone();

            tokio::spawn(async move {
                match SecureChannel::accept(stream, channel_config).await {
                    Ok(mut channel) => {
                        if let Err(e) = dispatcher.serve(&mut channel).await {
                            error!(%peer, error = %e, "connection failed");
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "handshake failed"),
                }
                info!(%peer, "connection closed");
            });
        }
    }
}
