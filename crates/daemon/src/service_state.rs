use std::time::Duration;

use common::prelude::DynBlobStore;

use crate::access::AccessController;
use crate::blobs::{Blobs, BlobsSetupError};
use crate::database::{Database, DatabaseSetupError};
use crate::pipeline::{DownloadPipeline, ShareLinks, UploadClaims, UploadPipeline};
use crate::progress::ProgressBroadcaster;
use crate::rate_limit::RateLimiter;
use crate::service_config::Config;
use crate::signaling::SignalingHub;
use crate::transport::{self, TransportError};

/// Limits applied to every share and request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharePolicy {
    pub default_ttl: Duration,
    pub max_upload_bytes: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            max_upload_bytes: 20 * 1024 * 1024 * 1024,
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for SharePolicy {
    fn from(config: &Config) -> Self {
        Self {
            default_ttl: config.default_ttl,
            max_upload_bytes: config.max_upload_bytes,
            rate_limit_max_requests: config.rate_limit_max_requests,
            rate_limit_window: config.rate_limit_window,
        }
    }
}

/// Main service state - owns every component the handlers talk to
#[derive(Clone, Debug)]
pub struct State {
    database: Database,
    blobs: DynBlobStore,
    access: AccessController,
    progress: ProgressBroadcaster,
    signaling: SignalingHub,
    rate_limiter: RateLimiter,
    links: ShareLinks,
    uploads: UploadClaims,
    policy: SharePolicy,
}

impl State {
    /// Connect storage, then publish the service. Nothing is served until
    ///  both the blob store and the transport have answered.
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. Setup database
        let database = match config.sqlite_path {
            Some(ref path) => {
                tracing::info!(path = %path.display(), "opening share registry");
                Database::open(path).await?
            }
            None => {
                tracing::warn!("using in-memory share registry");
                Database::in_memory().await?
            }
        };

        // 2. Setup blob store
        let blobs = Blobs::setup(&config.blob_store, &config.state_dir, config.blob_timeout)
            .await?
            .into_inner();

        // 3. Publish through the transport
        let transport = transport::from_config(&config.transport);
        let public_host = transport::start_with_retries(
            transport.as_ref(),
            config.listen_port,
            transport::START_ATTEMPTS,
            transport::START_BACKOFF,
        )
        .await?;
        tracing::info!(public_host = %public_host, "service published");

        Ok(Self::new(
            database,
            blobs,
            ShareLinks::new(public_host),
            SharePolicy::from(config),
        ))
    }

    pub fn new(
        database: Database,
        blobs: DynBlobStore,
        links: ShareLinks,
        policy: SharePolicy,
    ) -> Self {
        Self {
            access: AccessController::new(database.clone()),
            progress: ProgressBroadcaster::new(),
            signaling: SignalingHub::new(),
            rate_limiter: RateLimiter::new(
                policy.rate_limit_max_requests,
                policy.rate_limit_window,
            ),
            database,
            blobs,
            links,
            uploads: UploadClaims::new(),
            policy,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn blobs(&self) -> &DynBlobStore {
        &self.blobs
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    pub fn signaling(&self) -> &SignalingHub {
        &self.signaling
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn links(&self) -> &ShareLinks {
        &self.links
    }

    pub fn policy(&self) -> &SharePolicy {
        &self.policy
    }

    pub fn upload_pipeline(&self) -> UploadPipeline {
        UploadPipeline::new(
            self.database.clone(),
            self.blobs.clone(),
            self.progress.clone(),
            self.links.clone(),
            self.uploads.clone(),
        )
    }

    pub fn download_pipeline(&self) -> DownloadPipeline {
        DownloadPipeline::new(self.access.clone(), self.blobs.clone())
    }
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        &self.database
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("database setup error: {0}")]
    Database(#[from] DatabaseSetupError),
    #[error("blob store setup error: {0}")]
    Blobs(#[from] BlobsSetupError),
    #[error("transport setup error: {0}")]
    Transport(#[from] TransportError),
}
