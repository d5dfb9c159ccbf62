/**
 * Download authorization: reservation against
 *  the registry's quota and expiry rules.
 */
pub mod access;
/**
 * Blob store selection and startup probing.
 */
pub mod blobs;
/**
 * Persistent share registry.
 */
pub mod database;
pub mod http_server;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod rate_limit;
pub mod service_config;
pub mod service_state;
pub mod signaling;
pub mod sweeper;
/**
 * Publishing the local server under a public host.
 */
pub mod transport;

// App state (configuration, paths)
pub mod state;

pub use process::{spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
pub use state::{AppConfig, AppState, BlobStoreConfig, StateError, TransportConfig};
