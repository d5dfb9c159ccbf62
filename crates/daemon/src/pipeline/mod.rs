/**
 * Zip bundling of multi-part uploads
 */
pub mod bundle;
/**
 * Reserve, fetch, open and range-slice a share
 *  for a downloader.
 */
pub mod download;
/**
 * Stage, bundle, seal, store and register an upload,
 *  reporting progress along the way.
 */
pub mod upload;

pub use download::{DownloadError, DownloadPipeline, PreparedDownload};
pub use upload::{
    ShareDescriptor, StagedUpload, UploadClaims, UploadError, UploadOptions, UploadPipeline,
};

use common::prelude::ShareId;

/// Builds the public links handed out for shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLinks {
    public_host: String,
}

impl ShareLinks {
    pub fn new(public_host: impl Into<String>) -> Self {
        Self {
            public_host: public_host.into(),
        }
    }

    pub fn public_host(&self) -> &str {
        &self.public_host
    }

    pub fn link(&self, share_id: &ShareId) -> String {
        format!("http://{}/download/{}", self.public_host, share_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link() {
        let links = ShareLinks::new("abcdef.onion");
        let id = ShareId::parse("xyz").unwrap();
        assert_eq!(links.link(&id), "http://abcdef.onion/download/xyz");
    }
}
