use clap::Args;
use url::Url;

use shroud_daemon::state::{AppConfig, AppState, BlobStoreConfig, StateError, TransportConfig};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Local port for the HTTP server
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Serve links under a fixed host instead of publishing an onion service
    #[arg(long)]
    pub static_host: Option<String>,

    /// Keep blobs on an IPFS node (e.g. http://127.0.0.1:5001) instead of local disk
    #[arg(long)]
    pub ipfs_api: Option<Url>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl Init {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(host) = &self.static_host {
            config.transport = TransportConfig::Static { host: host.clone() };
        }
        if let Some(api_url) = &self.ipfs_api {
            config.blob_store = BlobStoreConfig::Ipfs {
                api_url: api_url.clone(),
            };
        }
        config
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::init(ctx.config_path.clone(), Some(self.app_config()))?;
        Ok(format!(
            "Initialized shroud in {}\n  config: {}",
            state.shroud_dir.display(),
            state.config_path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_shape_config() {
        let init = Init {
            listen_port: Some(6000),
            static_host: Some("files.example.org".into()),
            ipfs_api: Some(Url::parse("http://127.0.0.1:5001").unwrap()),
        };
        let config = init.app_config();
        assert_eq!(config.listen_port, 6000);
        assert!(matches!(config.transport, TransportConfig::Static { ref host } if host == "files.example.org"));
        assert!(matches!(config.blob_store, BlobStoreConfig::Ipfs { .. }));
    }

    #[test]
    fn test_defaults_to_tor_and_disk() {
        let init = Init {
            listen_port: None,
            static_host: None,
            ipfs_api: None,
        };
        assert_eq!(init.app_config(), AppConfig::default());
    }
}
