//! Blob storage setup for the daemon.
//!
//! Follows the same pattern as the database module: configuration in,
//! a ready-to-use handle (or a setup error) out.

mod ipfs;
mod setup;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::blobs::TimedBlobStore;
use common::prelude::{BlobStoreError, DynBlobStore};

use crate::state::BlobStoreConfig;

pub use ipfs::IpfsBlobStore;

/// A configured blob backend, bounded by the per-call timeout
#[derive(Clone, Debug)]
pub struct Blobs(DynBlobStore);

impl Blobs {
    /// Build the backend named by `config` and wait until it answers a ping.
    ///
    /// # Arguments
    /// * `config` - which backend to use
    /// * `state_dir` - state directory, for the default filesystem path
    /// * `timeout` - bound applied to every call on the backend
    pub async fn setup(
        config: &BlobStoreConfig,
        state_dir: &Path,
        timeout: Duration,
    ) -> Result<Self, BlobsSetupError> {
        let store = setup::setup_blob_store(config, state_dir).await?;
        let store = Self(Arc::new(TimedBlobStore::new(store, timeout)));
        setup::wait_until_reachable(&store.0, setup::PING_ATTEMPTS, setup::PING_BACKOFF).await?;
        Ok(store)
    }

    pub fn into_inner(self) -> DynBlobStore {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobsSetupError {
    #[error("blob store error: {0}")]
    Store(#[from] BlobStoreError),
    #[error("blob store unreachable after {attempts} attempts: {last}")]
    Unreachable {
        attempts: u32,
        last: BlobStoreError,
    },
}
