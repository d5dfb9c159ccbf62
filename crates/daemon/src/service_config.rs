use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::state::{AppConfig, BlobStoreConfig, TransportConfig};

/// Resolved runtime configuration for one daemon process
#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// Local port for the HTTP server
    pub listen_port: u16,
    pub max_upload_bytes: u64,

    // storage configuration
    pub blob_store: BlobStoreConfig,
    /// Path to the state directory, used to resolve default blob paths
    pub state_dir: PathBuf,
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    pub blob_timeout: Duration,

    // exposure
    pub transport: TransportConfig,

    // share policy
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build a runtime config from the persisted app config.
    ///  Storage paths are resolved relative to `state_dir`.
    pub fn from_app_config(app: &AppConfig, state_dir: PathBuf, sqlite_path: Option<PathBuf>) -> Self {
        Self {
            listen_port: app.listen_port,
            max_upload_bytes: app.max_upload_bytes,
            blob_store: app.blob_store.clone(),
            state_dir,
            sqlite_path,
            blob_timeout: Duration::from_secs(app.blob_timeout_secs),
            transport: app.transport.clone(),
            default_ttl: Duration::from_secs(app.default_ttl_secs),
            sweep_interval: Duration::from_secs(app.sweep_interval_secs),
            rate_limit_max_requests: app.rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(app.rate_limit_window_secs),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }

    /// Where the HTTP server binds. Behind Tor only the local onion
    ///  service needs to reach it.
    pub fn listen_addr(&self) -> SocketAddr {
        let ip = match self.transport {
            TransportConfig::Tor { .. } => Ipv4Addr::LOCALHOST,
            TransportConfig::Static { .. } => Ipv4Addr::UNSPECIFIED,
        };
        SocketAddr::from((ip, self.listen_port))
    }
}
