use std::net::SocketAddr;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "shroud";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local port the HTTP server binds to; the hidden service forwards here
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Lifetime of a new share
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Requests allowed per share within one window
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// Upper bound on any single blob store call
    #[serde(default = "default_blob_timeout_secs")]
    pub blob_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_listen_port() -> u16 {
    5000
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_rate_limit_max_requests() -> u32 {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_blob_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            blob_store: BlobStoreConfig::default(),
            transport: TransportConfig::default(),
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            blob_timeout_secs: default_blob_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Where encrypted share blobs live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlobStoreConfig {
    /// Process memory; everything is lost on restart
    Memory,

    /// Content-addressed files on local disk
    Filesystem {
        /// Defaults to the `blobs/` directory inside the state directory
        path: Option<PathBuf>,
    },

    /// An IPFS node's HTTP RPC API
    Ipfs {
        /// e.g. "http://127.0.0.1:5001"
        api_url: Url,
    },
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        BlobStoreConfig::Filesystem { path: None }
    }
}

/// How the service is exposed to downloaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Publish an onion service through a local Tor control port
    Tor {
        #[serde(default = "default_tor_control_addr")]
        control_addr: SocketAddr,
        /// Port downloaders connect to on the onion address
        #[serde(default = "default_virtual_port")]
        virtual_port: u16,
        #[serde(default)]
        control_password: Option<String>,
    },

    /// A fixed, already reachable host name
    Static { host: String },
}

fn default_tor_control_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9051))
}

fn default_virtual_port() -> u16 {
    80
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tor {
            control_addr: default_tor_control_addr(),
            virtual_port: default_virtual_port(),
            control_password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.shroud)
    pub shroud_dir: PathBuf,
    pub db_path: PathBuf,
    pub blobs_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.shroud)
    pub fn shroud_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let shroud_dir = Self::shroud_dir(custom_path)?;

        if shroud_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&shroud_dir)?;

        let blobs_path = shroud_dir.join(BLOBS_DIR_NAME);
        fs::create_dir_all(&blobs_path)?;

        let config = config.unwrap_or_default();
        let config_path = shroud_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // migrations run when the daemon first opens it
        let db_path = shroud_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            shroud_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }

    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let shroud_dir = Self::shroud_dir(custom_path)?;

        if !shroud_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = shroud_dir.join(DB_FILE_NAME);
        let blobs_path = shroud_dir.join(BLOBS_DIR_NAME);
        let config_path = shroud_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !blobs_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", BLOBS_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            shroud_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("shroud directory not initialized. Run 'shroud init' first")]
    NotInitialized,

    #[error("shroud directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
