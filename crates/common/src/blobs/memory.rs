use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{content_ref, BlobRef, BlobStore, BlobStoreError};

/// Process-local blob store, lost on exit
#[derive(Clone, Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<BlobRef, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn contains(&self, blob_ref: &BlobRef) -> bool {
        self.blobs.read().contains_key(blob_ref)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError> {
        let blob_ref = content_ref(&data);
        self.blobs.write().insert(blob_ref.clone(), data);
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
        self.blobs
            .read()
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(blob_ref.clone()))
    }

    async fn delete(&self, blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
        self.blobs.write().remove(blob_ref);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BlobStoreError> {
        Ok(())
    }
}
