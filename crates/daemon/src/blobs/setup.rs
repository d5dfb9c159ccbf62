use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::blobs::{FsBlobStore, MemoryBlobStore};
use common::prelude::DynBlobStore;

use crate::state::{BlobStoreConfig, BLOBS_DIR_NAME};

use super::{BlobsSetupError, IpfsBlobStore};

pub(super) const PING_ATTEMPTS: u32 = 10;
pub(super) const PING_BACKOFF: Duration = Duration::from_secs(1);

/// Setup the blob store based on configuration.
///
/// Supports three modes:
/// - Memory: process-local, for development and tests
/// - Filesystem: BLAKE3-addressed files, `state_dir/blobs` unless a path is given
/// - Ipfs: a local IPFS node's HTTP API
pub async fn setup_blob_store(
    config: &BlobStoreConfig,
    state_dir: &Path,
) -> Result<DynBlobStore, BlobsSetupError> {
    let store: DynBlobStore = match config {
        BlobStoreConfig::Memory => {
            tracing::warn!("Using in-memory blob store, shares will not survive a restart");
            Arc::new(MemoryBlobStore::new())
        }

        BlobStoreConfig::Filesystem { path } => {
            let path = path
                .clone()
                .unwrap_or_else(|| state_dir.join(BLOBS_DIR_NAME));
            tracing::info!(path = %path.display(), "Using filesystem blob store");
            Arc::new(FsBlobStore::open(&path).await?)
        }

        BlobStoreConfig::Ipfs { api_url } => {
            tracing::info!(api_url = %api_url, "Using IPFS blob store");
            Arc::new(IpfsBlobStore::new(api_url.clone())?)
        }
    };

    Ok(store)
}

/// Ping `store` until it answers, giving up after `attempts` tries
pub async fn wait_until_reachable(
    store: &DynBlobStore,
    attempts: u32,
    backoff: Duration,
) -> Result<(), BlobsSetupError> {
    let mut attempt = 1;
    loop {
        match store.ping().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(BlobsSetupError::Unreachable { attempts, last: e });
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts = attempts, error = %e, "blob store not ready, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
