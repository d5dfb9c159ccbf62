use bytes::Bytes;
use chrono::Utc;

use common::crypto::{open, EncryptedBlob, SharePrivateKey};
use common::prelude::{BlobStoreError, ByteRange, CodecError, DynBlobStore, RangeError, ShareId};

use crate::access::{AccessController, AccessError};
use crate::database::ShareRecord;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("range not satisfiable")]
    RangeNotSatisfiable { total: u64 },
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("failed to open share: {0}")]
    Codec(#[from] CodecError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A reserved, decrypted and authenticated download
#[derive(Debug)]
pub struct PreparedDownload {
    pub record: ShareRecord,
    /// Plaintext length of the whole share
    pub total_len: u64,
    /// Set when the caller asked for a byte range
    pub range: Option<ByteRange>,
    /// The requested bytes, already verified against the envelope tag
    pub body: Bytes,
}

impl PreparedDownload {
    pub fn is_partial(&self) -> bool {
        self.range.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct DownloadPipeline {
    access: AccessController,
    blobs: DynBlobStore,
}

impl DownloadPipeline {
    pub fn new(access: AccessController, blobs: DynBlobStore) -> Self {
        Self { access, blobs }
    }

    /// Resolve a download request.
    ///
    /// Everything that can fail on the request's own terms (unknown or
    ///  exhausted share, unreachable storage, unsatisfiable range) is checked
    ///  before the slot is reserved, so those failures cost no quota. Once
    ///  reserved, the slot stays consumed even if opening the envelope fails.
    pub async fn prepare(
        &self,
        share_id: &ShareId,
        range_header: Option<&str>,
    ) -> Result<PreparedDownload, DownloadError> {
        let snapshot = self.access.precheck(share_id, Utc::now()).await?;

        let bytes = self.blobs.get(&snapshot.blob_ref).await?;
        let blob = EncryptedBlob::parse(bytes)?;
        let total_len = blob.plaintext_len();

        let range = range_header
            .map(|header| ByteRange::parse(header, total_len))
            .transpose()
            .map_err(|e: RangeError| {
                tracing::debug!(share_id = %share_id, error = %e, "rejecting range");
                DownloadError::RangeNotSatisfiable { total: total_len }
            })?;

        let record = self.access.reserve(share_id, Utc::now()).await?;

        let pem = record.private_key.clone();
        let body = tokio::task::spawn_blocking(move || -> Result<Bytes, CodecError> {
            let key = SharePrivateKey::from_pem(&pem)?;
            open(&blob, &key, range)
        })
        .await?
        .map_err(|e| {
            tracing::error!(share_id = %share_id, blob_ref = %record.blob_ref, error = %e, "failed to open share");
            e
        })?;

        Ok(PreparedDownload {
            record,
            total_len,
            range,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::blobs::MemoryBlobStore;
    use common::crypto::seal;
    use common::prelude::{BlobRef, BlobStore};

    use super::*;
    use crate::database::{Database, NewShare};

    struct Harness {
        pipeline: DownloadPipeline,
        database: Database,
        blobs: MemoryBlobStore,
    }

    async fn harness() -> Harness {
        let database = Database::in_memory().await.unwrap();
        let blobs = MemoryBlobStore::new();
        let pipeline = DownloadPipeline::new(
            AccessController::new(database.clone()),
            Arc::new(blobs.clone()),
        );
        Harness {
            pipeline,
            database,
            blobs,
        }
    }

    async fn add_share(h: &Harness, id: &str, plaintext: &[u8], max_downloads: u32) -> ShareId {
        let key = SharePrivateKey::generate().unwrap();
        let blob = seal(plaintext, &key.public()).unwrap();
        let blob_ref = h.blobs.put(blob.into_bytes()).await.unwrap();
        add_record(h, id, blob_ref, key.to_pem().unwrap(), max_downloads).await
    }

    async fn add_record(
        h: &Harness,
        id: &str,
        blob_ref: BlobRef,
        private_key: String,
        max_downloads: u32,
    ) -> ShareId {
        h.database
            .create_share(
                NewShare {
                    share_id: Some(ShareId::parse(id).unwrap()),
                    blob_ref,
                    filename: "data.bin".into(),
                    content_type: "application/octet-stream".into(),
                    private_key,
                    max_downloads,
                    ttl: Duration::from_secs(3600),
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    fn sample() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_full_download_then_quota() {
        let h = harness().await;
        let id = add_share(&h, "one", &sample(), 1).await;

        let download = h.pipeline.prepare(&id, None).await.unwrap();
        assert!(!download.is_partial());
        assert_eq!(download.body, sample());
        assert_eq!(download.record.download_count, 1);

        let err = h.pipeline.prepare(&id, None).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Access(AccessError::QuotaExceeded)
        ));
    }

    #[tokio::test]
    async fn test_ranged_download() {
        let h = harness().await;
        let id = add_share(&h, "ranged", &sample(), 3).await;

        let download = h.pipeline.prepare(&id, Some("bytes=0-99")).await.unwrap();
        assert_eq!(download.total_len, 1000);
        assert_eq!(download.range, Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(download.body, sample()[..100]);

        let tail = h.pipeline.prepare(&id, Some("bytes=900-")).await.unwrap();
        assert_eq!(tail.body, sample()[900..]);
    }

    #[tokio::test]
    async fn test_bad_range_costs_no_quota() {
        let h = harness().await;
        let id = add_share(&h, "bad-range", &sample(), 1).await;

        let err = h
            .pipeline
            .prepare(&id, Some("bytes=1000-1005"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::RangeNotSatisfiable { total: 1000 }
        ));
        let record = h.database.get_snapshot(&id).await.unwrap();
        assert_eq!(record.download_count, 0);
        assert!(record.active);
    }

    #[tokio::test]
    async fn test_missing_blob_costs_no_quota() {
        let h = harness().await;
        let id = add_record(&h, "no-blob", BlobRef::new("missing"), "pem".into(), 1).await;

        let err = h.pipeline.prepare(&id, None).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::BlobStore(BlobStoreError::NotFound(_))
        ));
        assert_eq!(h.database.get_snapshot(&id).await.unwrap().download_count, 0);
    }

    #[tokio::test]
    async fn test_tampered_blob_consumes_slot_and_fails() {
        let h = harness().await;
        let key = SharePrivateKey::generate().unwrap();
        let blob = seal(&sample(), &key.public()).unwrap();
        let mut bytes = blob.into_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let blob_ref = h.blobs.put(Bytes::from(bytes)).await.unwrap();
        let id = add_record(&h, "tampered", blob_ref, key.to_pem().unwrap(), 2).await;

        let err = h.pipeline.prepare(&id, Some("bytes=0-9")).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Codec(CodecError::AuthenticationFailed)
        ));
        assert_eq!(h.database.get_snapshot(&id).await.unwrap().download_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_share() {
        let h = harness().await;
        let err = h
            .pipeline
            .prepare(&ShareId::parse("ghost").unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Access(AccessError::NotFound(_))));
    }
}
