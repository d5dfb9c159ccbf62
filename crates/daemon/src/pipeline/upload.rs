use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use common::crypto::{EncryptedBlob, Sealer, SharePrivateKey, CHUNK_SIZE};
use common::prelude::{BlobStoreError, CodecError, DynBlobStore, ProgressEvent, ShareId};
use common::share::ShareIdError;

use super::bundle::{self, BundleError, BUNDLE_CONTENT_TYPE};
use super::ShareLinks;
use crate::database::{Database, NewShare, RegistryError};
use crate::progress::ProgressBroadcaster;

const FALLBACK_FILENAME: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("share id already in use: {0}")]
    DuplicateShare(ShareId),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("registry error: {0}")]
    Registry(RegistryError),
    #[error("encryption failed: {0}")]
    Codec(#[from] CodecError),
    #[error("bundling failed: {0}")]
    Bundle(#[from] BundleError),
    #[error("share id generation failed: {0}")]
    ShareId(#[from] ShareIdError),
    #[error("staging failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<RegistryError> for UploadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateShare(id) => Self::DuplicateShare(id),
            RegistryError::InvalidQuota => Self::InvalidInput(err.to_string()),
            other => Self::Registry(other),
        }
    }
}

/// A file received from the uploader, written to scratch storage
#[derive(Debug)]
pub struct StagedPart {
    pub filename: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub len: u64,
}

/// Scratch directory holding the parts of one upload.
///  The directory and everything in it is removed when this is dropped,
///  whichever way the upload ends.
#[derive(Debug)]
pub struct StagedUpload {
    dir: TempDir,
    parts: Vec<StagedPart>,
}

impl StagedUpload {
    pub fn new() -> Result<Self, UploadError> {
        let dir = tempfile::Builder::new().prefix("shroud-upload-").tempdir()?;
        Ok(Self {
            dir,
            parts: Vec::new(),
        })
    }

    /// Write one part to disk in arrival order, returning its length
    pub async fn stage<S, E>(
        &mut self,
        filename: &str,
        content_type: Option<String>,
        chunks: S,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let path = self.dir.path().join(self.parts.len().to_string());
        let mut file = tokio::fs::File::create(&path).await?;
        let mut len = 0u64;

        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk
                .map_err(|e| UploadError::InvalidInput(format!("failed to read upload: {}", e)))?;
            file.write_all(&chunk).await?;
            len += chunk.len() as u64;
        }
        file.flush().await?;

        self.parts.push(StagedPart {
            filename: sanitize_filename(filename),
            content_type: content_type.filter(|ct| !ct.trim().is_empty()),
            path,
            len,
        });
        Ok(len)
    }

    pub async fn stage_bytes(
        &mut self,
        filename: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> Result<u64, UploadError> {
        let chunks = futures::stream::once(async move { Ok::<_, std::convert::Infallible>(data) });
        self.stage(filename, content_type, chunks).await
    }

    pub fn parts(&self) -> &[StagedPart] {
        &self.parts
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Keep only the final path component of a client supplied name, minus
///  anything that would break a header or archive entry
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_downloads: u32,
    pub share_id: Option<ShareId>,
    pub zip_name: Option<String>,
    pub ttl: Duration,
}

/// What the uploader gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareDescriptor {
    pub share_id: ShareId,
    pub share_link: String,
    pub filename: String,
    pub max_downloads: u32,
}

struct Payload {
    data: Vec<u8>,
    filename: String,
    content_type: String,
}

/// Share ids with an upload in flight. Only the holder of a claim
///  publishes progress for, or closes the listeners of, that id.
#[derive(Debug, Clone, Default)]
pub struct UploadClaims(Arc<Mutex<HashSet<ShareId>>>);

impl UploadClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `share_id`, or `None` if another upload holds it
    pub fn claim(&self, share_id: &ShareId) -> Option<UploadClaim> {
        if !self.0.lock().insert(share_id.clone()) {
            return None;
        }
        Some(UploadClaim {
            claims: self.clone(),
            share_id: share_id.clone(),
        })
    }

    pub fn is_claimed(&self, share_id: &ShareId) -> bool {
        self.0.lock().contains(share_id)
    }
}

/// Released on drop
#[derive(Debug)]
pub struct UploadClaim {
    claims: UploadClaims,
    share_id: ShareId,
}

impl Drop for UploadClaim {
    fn drop(&mut self) {
        self.claims.0.lock().remove(&self.share_id);
    }
}

#[derive(Debug, Clone)]
pub struct UploadPipeline {
    database: Database,
    blobs: DynBlobStore,
    progress: ProgressBroadcaster,
    links: ShareLinks,
    claims: UploadClaims,
}

impl UploadPipeline {
    pub fn new(
        database: Database,
        blobs: DynBlobStore,
        progress: ProgressBroadcaster,
        links: ShareLinks,
        claims: UploadClaims,
    ) -> Self {
        Self {
            database,
            blobs,
            progress,
            links,
            claims,
        }
    }

    /// Seal the staged parts into a new share.
    ///
    /// Listeners for the share see capped progress per sealed chunk, then a
    ///  single completion event once the share is registered. On failure
    ///  they see nothing further and their streams are closed.
    pub async fn run(
        &self,
        staged: StagedUpload,
        options: UploadOptions,
    ) -> Result<ShareDescriptor, UploadError> {
        if staged.parts.is_empty() {
            return Err(UploadError::InvalidInput(
                "at least one file is required".into(),
            ));
        }
        if options.max_downloads == 0 {
            return Err(UploadError::InvalidInput(
                "max_downloads must be at least 1".into(),
            ));
        }

        let share_id = match &options.share_id {
            Some(id) => id.clone(),
            None => ShareId::generate()?,
        };
        let Some(_claim) = self.claims.claim(&share_id) else {
            return Err(UploadError::DuplicateShare(share_id));
        };
        if options.share_id.is_some() && self.database.share_exists(&share_id).await? {
            return Err(UploadError::DuplicateShare(share_id));
        }

        let result = self.seal_and_register(&share_id, &staged, &options).await;
        match &result {
            Ok(descriptor) => {
                self.progress.publish(&ProgressEvent::complete(share_id.clone()));
                tracing::info!(
                    share_id = %share_id,
                    filename = %descriptor.filename,
                    max_downloads = descriptor.max_downloads,
                    "share created"
                );
            }
            Err(e) => {
                tracing::error!(share_id = %share_id, error = %e, "upload failed");
            }
        }
        self.progress.close(&share_id);
        result
    }

    async fn seal_and_register(
        &self,
        share_id: &ShareId,
        staged: &StagedUpload,
        options: &UploadOptions,
    ) -> Result<ShareDescriptor, UploadError> {
        let Payload {
            data,
            filename,
            content_type,
        } = prepare_payload(staged, options.zip_name.as_deref()).await?;

        let private_key = tokio::task::spawn_blocking(SharePrivateKey::generate).await??;
        let pem = private_key.to_pem()?;
        let public_key = private_key.public();

        let progress = self.progress.clone();
        let progress_id = share_id.clone();
        let blob = tokio::task::spawn_blocking(move || -> Result<EncryptedBlob, CodecError> {
            let total = data.len() as u64;
            let mut sealer = Sealer::with_capacity(&public_key, data.len())?;
            for chunk in data.chunks(CHUNK_SIZE) {
                sealer.update(chunk);
                progress.publish(&ProgressEvent::uploading(
                    progress_id.clone(),
                    sealer.processed(),
                    total,
                ));
            }
            Ok(sealer.finish())
        })
        .await??;

        let blob_ref = self.blobs.put(blob.into_bytes()).await?;

        let share = NewShare {
            share_id: Some(share_id.clone()),
            blob_ref: blob_ref.clone(),
            filename: filename.clone(),
            content_type,
            private_key: pem,
            max_downloads: options.max_downloads,
            ttl: options.ttl,
        };
        if let Err(e) = self.database.create_share(share, Utc::now()).await {
            if let Err(delete_err) = self.blobs.delete(&blob_ref).await {
                tracing::warn!(
                    share_id = %share_id,
                    blob_ref = %blob_ref,
                    error = %delete_err,
                    "failed to remove blob of unregistered share"
                );
            }
            return Err(e.into());
        }

        let share_link = self.links.link(share_id);
        if let Err(e) = self.database.mark_link_published(share_id).await {
            tracing::warn!(share_id = %share_id, error = %e, "failed to mark link published");
        }

        Ok(ShareDescriptor {
            share_id: share_id.clone(),
            share_link,
            filename,
            max_downloads: options.max_downloads,
        })
    }
}

async fn prepare_payload(
    staged: &StagedUpload,
    zip_name: Option<&str>,
) -> Result<Payload, UploadError> {
    if let [part] = staged.parts() {
        let data = tokio::fs::read(&part.path).await?;
        let content_type = part.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&part.filename)
                .first_or_octet_stream()
                .to_string()
        });
        return Ok(Payload {
            data,
            filename: part.filename.clone(),
            content_type,
        });
    }

    let entries: Vec<(String, PathBuf)> = staged
        .parts()
        .iter()
        .map(|part| (part.filename.clone(), part.path.clone()))
        .collect();
    let data = tokio::task::spawn_blocking(move || {
        bundle::bundle(
            entries
                .iter()
                .map(|(name, path)| (name.as_str(), path.as_path())),
        )
    })
    .await??;

    Ok(Payload {
        data,
        filename: bundle::bundle_name(zip_name),
        content_type: BUNDLE_CONTENT_TYPE.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use async_trait::async_trait;
    use tokio::sync::mpsc::error::TryRecvError;

    use common::blobs::MemoryBlobStore;
    use common::crypto::open;
    use common::prelude::{BlobRef, BlobStore, ProgressStatus};

    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    struct Harness {
        pipeline: UploadPipeline,
        database: Database,
        blobs: MemoryBlobStore,
        progress: ProgressBroadcaster,
    }

    async fn harness() -> Harness {
        let database = Database::in_memory().await.unwrap();
        let blobs = MemoryBlobStore::new();
        let progress = ProgressBroadcaster::new();
        let pipeline = UploadPipeline::new(
            database.clone(),
            Arc::new(blobs.clone()),
            progress.clone(),
            ShareLinks::new("example.onion"),
            UploadClaims::new(),
        );
        Harness {
            pipeline,
            database,
            blobs,
            progress,
        }
    }

    fn options(share_id: Option<&str>, max_downloads: u32) -> UploadOptions {
        UploadOptions {
            max_downloads,
            share_id: share_id.map(|id| ShareId::parse(id).unwrap()),
            zip_name: None,
            ttl: DAY,
        }
    }

    async fn open_share(h: &Harness, share_id: &ShareId) -> Vec<u8> {
        let record = h.database.get_snapshot(share_id).await.unwrap();
        let bytes = h.blobs.get(&record.blob_ref).await.unwrap();
        let blob = EncryptedBlob::parse(bytes).unwrap();
        let key = SharePrivateKey::from_pem(&record.private_key).unwrap();
        open(&blob, &key, None).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_single_file_upload() {
        let h = harness().await;
        let data: Vec<u8> = (0..(3 * CHUNK_SIZE + 10)).map(|i| i as u8).collect();

        let mut staged = StagedUpload::new().unwrap();
        let staging_dir = staged.path().to_path_buf();
        staged
            .stage_bytes("report.pdf", None, Bytes::from(data.clone()))
            .await
            .unwrap();

        let mut listener = h.progress.subscribe(&ShareId::parse("doc").unwrap());
        let descriptor = h.pipeline.run(staged, options(Some("doc"), 2)).await.unwrap();

        assert_eq!(descriptor.share_link, "http://example.onion/download/doc");
        assert_eq!(descriptor.filename, "report.pdf");
        assert_eq!(descriptor.max_downloads, 2);
        assert!(!staging_dir.exists());

        let record = h.database.get_snapshot(&descriptor.share_id).await.unwrap();
        assert_eq!(record.content_type, "application/pdf");
        assert!(record.link_published);
        assert_eq!(open_share(&h, &descriptor.share_id).await, data);

        let mut events = Vec::new();
        while let Some(event) = listener.events.recv().await {
            events.push(event);
        }
        let (last, streaming) = events.split_last().unwrap();
        assert_eq!(streaming.len(), 4);
        assert!(streaming
            .iter()
            .all(|e| e.status == ProgressStatus::Uploading && e.percent <= 90));
        assert_eq!(last.percent, 100);
        assert!(last.is_complete());
    }

    #[tokio::test]
    async fn test_multi_file_upload_is_zipped() {
        let h = harness().await;
        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("a.txt", Some("text/plain".into()), Bytes::from_static(b"one"))
            .await
            .unwrap();
        staged
            .stage_bytes("dir/a.txt", None, Bytes::from_static(b"two"))
            .await
            .unwrap();

        let mut opts = options(None, 1);
        opts.zip_name = Some("stuff".into());
        let descriptor = h.pipeline.run(staged, opts).await.unwrap();
        assert_eq!(descriptor.filename, "stuff.zip");

        let record = h.database.get_snapshot(&descriptor.share_id).await.unwrap();
        assert_eq!(record.content_type, "application/zip");

        let archive = open_share(&h, &descriptor.share_id).await;
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        let mut second = String::new();
        let mut entry = zip.by_index(1).unwrap();
        assert_eq!(entry.name(), "a (1).txt");
        entry.read_to_string(&mut second).unwrap();
        assert_eq!(second, "two");
    }

    #[tokio::test]
    async fn test_duplicate_share_id_rejected_before_sealing() {
        let h = harness().await;
        for expect_ok in [true, false] {
            let mut staged = StagedUpload::new().unwrap();
            staged
                .stage_bytes("x", None, Bytes::from_static(b"x"))
                .await
                .unwrap();
            let result = h.pipeline.run(staged, options(Some("taken"), 1)).await;
            assert_eq!(result.is_ok(), expect_ok);
            if !expect_ok {
                assert!(matches!(result, Err(UploadError::DuplicateShare(_))));
            }
        }
        assert_eq!(h.blobs.len(), 1);
    }

    #[derive(Debug)]
    struct RejectingStore;

    #[async_trait]
    impl BlobStore for RejectingStore {
        async fn put(&self, _data: Bytes) -> Result<BlobRef, BlobStoreError> {
            Err(BlobStoreError::TimedOut)
        }

        async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
            Err(BlobStoreError::NotFound(blob_ref.clone()))
        }

        async fn delete(&self, _blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), BlobStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_store_ends_progress_without_completion() {
        let database = Database::in_memory().await.unwrap();
        let progress = ProgressBroadcaster::new();
        let pipeline = UploadPipeline::new(
            database.clone(),
            Arc::new(RejectingStore),
            progress.clone(),
            ShareLinks::new("example.onion"),
            UploadClaims::new(),
        );

        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("big.bin", None, Bytes::from(vec![1u8; 3 * CHUNK_SIZE]))
            .await
            .unwrap();

        let id = ShareId::parse("doomed").unwrap();
        let mut listener = progress.subscribe(&id);
        let err = pipeline
            .run(staged, options(Some("doomed"), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::BlobStore(BlobStoreError::TimedOut)));

        let mut events = Vec::new();
        while let Some(event) = listener.events.recv().await {
            events.push(event);
        }
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|e| e.status == ProgressStatus::Uploading && e.percent <= 90));
        assert!(listener.events.recv().await.is_none());
        assert!(!database.share_exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_upload_leaves_owner_listeners_alone() {
        let h = harness().await;
        let id = ShareId::parse("busy").unwrap();
        let mut listener = h.progress.subscribe(&id);
        let claim = h.pipeline.claims.claim(&id).unwrap();

        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("x", None, Bytes::from_static(b"x"))
            .await
            .unwrap();
        let result = h.pipeline.run(staged, options(Some("busy"), 1)).await;
        assert!(matches!(result, Err(UploadError::DuplicateShare(_))));

        assert!(matches!(listener.events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(h.progress.listener_count(&id), 1);
        assert!(h.blobs.is_empty());

        drop(claim);
        assert!(!h.pipeline.claims.is_claimed(&id));

        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("x", None, Bytes::from_static(b"x"))
            .await
            .unwrap();
        h.pipeline.run(staged, options(Some("busy"), 1)).await.unwrap();
        assert!(!h.pipeline.claims.is_claimed(&id));
    }

    #[tokio::test]
    async fn test_link_publish_failure_still_returns_link() {
        let h = harness().await;
        sqlx::query(
            "CREATE TRIGGER block_publish BEFORE UPDATE OF link_published ON shares \
             BEGIN SELECT RAISE(ABORT, 'publish blocked'); END",
        )
        .execute(&*h.database)
        .await
        .unwrap();

        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("notes.txt", None, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let descriptor = h.pipeline.run(staged, options(Some("quiet"), 1)).await.unwrap();
        assert_eq!(descriptor.share_link, "http://example.onion/download/quiet");

        let record = h.database.get_snapshot(&descriptor.share_id).await.unwrap();
        assert!(!record.link_published);
        assert!(record.active);
        assert_eq!(h.blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let h = harness().await;

        let empty = StagedUpload::new().unwrap();
        assert!(matches!(
            h.pipeline.run(empty, options(None, 1)).await,
            Err(UploadError::InvalidInput(_))
        ));

        let mut staged = StagedUpload::new().unwrap();
        staged
            .stage_bytes("x", None, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(matches!(
            h.pipeline.run(staged, options(None, 0)).await,
            Err(UploadError::InvalidInput(_))
        ));
        assert!(h.blobs.is_empty());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\a.txt"), "a.txt");
        assert_eq!(sanitize_filename("we\"ird\n.txt"), "weird.txt");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("dir/"), "file");
    }
}
