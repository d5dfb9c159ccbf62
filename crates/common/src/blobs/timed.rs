use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlobRef, BlobStore, BlobStoreError, DynBlobStore};

/// Bounds every call on the inner store by a fixed timeout
#[derive(Clone, Debug)]
pub struct TimedBlobStore {
    inner: DynBlobStore,
    timeout: Duration,
}

impl TimedBlobStore {
    pub fn new(inner: DynBlobStore, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BlobStoreError>>,
    ) -> Result<T, BlobStoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.timeout, "blob store call timed out");
                Err(BlobStoreError::TimedOut)
            }
        }
    }
}

#[async_trait]
impl BlobStore for TimedBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError> {
        self.bounded("put", self.inner.put(data)).await
    }

    async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
        self.bounded("get", self.inner.get(blob_ref)).await
    }

    async fn delete(&self, blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
        self.bounded("delete", self.inner.delete(blob_ref)).await
    }

    async fn ping(&self) -> Result<(), BlobStoreError> {
        self.bounded("ping", self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::MemoryBlobStore;
    use super::*;

    #[derive(Debug)]
    struct Stalled;

    #[async_trait]
    impl BlobStore for Stalled {
        async fn put(&self, _data: Bytes) -> Result<BlobRef, BlobStoreError> {
            futures::future::pending().await
        }

        async fn get(&self, _blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
            futures::future::pending().await
        }

        async fn delete(&self, _blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
            futures::future::pending().await
        }

        async fn ping(&self) -> Result<(), BlobStoreError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out() {
        let store = TimedBlobStore::new(Arc::new(Stalled), Duration::from_secs(5));
        let err = store.get(&BlobRef::new("x")).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::TimedOut));
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_passes_through_results() {
        let store = TimedBlobStore::new(
            Arc::new(MemoryBlobStore::new()),
            Duration::from_secs(5),
        );
        let blob_ref = store.put(Bytes::from_static(b"ok")).await.unwrap();
        assert_eq!(store.get(&blob_ref).await.unwrap(), "ok");
    }
}
