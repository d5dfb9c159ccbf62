use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{content_ref, BlobRef, BlobStore, BlobStoreError};

const REF_LEN: usize = 64;

/// Blob store backed by a flat directory of files named by their
///  BLAKE3 hex digest.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobStoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, blob_ref: &BlobRef) -> Result<PathBuf, BlobStoreError> {
        let value = blob_ref.as_str();
        // refs become file names; anything but a digest could escape the root
        if value.len() != REF_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlobStoreError::InvalidRef(blob_ref.clone()));
        }
        Ok(self.root.join(value))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError> {
        let blob_ref = content_ref(&data);
        let path = self.path_for(&blob_ref)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(blob_ref);
        }

        let tmp = self.root.join(format!("{}.tmp", blob_ref));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(blob_ref = %blob_ref, len = data.len(), "stored blob");
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(blob_ref.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<(), BlobStoreError> {
        let metadata = tokio::fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(BlobStoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}
