use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod fs;
mod memory;
mod timed;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use timed::TimedBlobStore;

/// Opaque reference handed back by a blob store.
///  Only the store that issued it knows how to interpret it
///  (a BLAKE3 digest, an IPFS CID, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlobRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(BlobRef),
    #[error("blob store call timed out")]
    TimedOut,
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid blob reference: {0}")]
    InvalidRef(BlobRef),
    #[error("blob store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobStoreError {
    /// Whether the failure is on the backend's side rather than the request's
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Unavailable(_))
    }
}

/// Content-addressed blob storage.
///  Implementations must be safe to share across tasks;
///  none of the methods hold locks across await points
///  that callers could observe.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Store `data`, returning the reference it can be fetched by
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError>;

    /// Fetch the bytes behind `blob_ref`
    async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError>;

    /// Remove `blob_ref`. Deleting an absent reference is not an error.
    async fn delete(&self, blob_ref: &BlobRef) -> Result<(), BlobStoreError>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), BlobStoreError>;
}

pub type DynBlobStore = Arc<dyn BlobStore>;

/// Hex encoded BLAKE3 digest, the reference format of the local backends
pub(crate) fn content_ref(data: &[u8]) -> BlobRef {
    BlobRef(blake3::hash(data).to_hex().to_string())
}
