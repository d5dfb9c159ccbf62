use clap::Args;

use shroud_daemon::state::{AppState, BlobStoreConfig, StateError, TransportConfig};
use shroud_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override the HTTP server port (default from config)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Serve links under this host instead of the configured transport
    #[arg(long)]
    pub static_host: Option<String>,

    /// Keep blobs in memory for this run only
    #[arg(long)]
    pub memory: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

impl Daemon {
    fn service_config(&self, state: AppState) -> ServiceConfig {
        let mut config = ServiceConfig::from_app_config(
            &state.config,
            state.shroud_dir.clone(),
            Some(state.db_path),
        );
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(host) = &self.static_host {
            config.transport = TransportConfig::Static { host: host.clone() };
        }
        if self.memory {
            config.blob_store = BlobStoreConfig::Memory;
        }
        config.log_level = tracing::Level::DEBUG;
        config.log_dir = self.log_dir.clone();
        config
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let config = self.service_config(state);

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
