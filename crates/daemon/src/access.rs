use chrono::{DateTime, Utc};

use common::prelude::ShareId;

use crate::database::{Database, RegistryError, ShareRecord};

/// Why a download was refused
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("share not found")]
    NotFound(ShareId),
    #[error("share has expired")]
    Expired,
    #[error("download limit reached")]
    QuotaExceeded,
    #[error("share is no longer active")]
    Inactive,
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

impl From<RegistryError> for AccessError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(id),
            RegistryError::Expired => Self::Expired,
            RegistryError::QuotaExceeded => Self::QuotaExceeded,
            RegistryError::Inactive => Self::Inactive,
            other => Self::Registry(other),
        }
    }
}

/// Gatekeeper for download slots.
///
/// Reservations are never rolled back: once [`AccessController::reserve`]
///  succeeds the slot is spent, whatever happens to the transfer afterwards.
#[derive(Clone, Debug)]
pub struct AccessController {
    database: Database,
}

impl AccessController {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Read-only availability check. Lets the download pipeline reject
    ///  requests before doing any storage work; it reserves nothing.
    pub async fn precheck(
        &self,
        share_id: &ShareId,
        now: DateTime<Utc>,
    ) -> Result<ShareRecord, AccessError> {
        let record = self.database.get_snapshot(share_id).await?;
        if record.stopped {
            return Err(AccessError::Inactive);
        }
        if record.download_count >= record.max_downloads {
            return Err(AccessError::QuotaExceeded);
        }
        if record.is_expired(now) {
            return Err(AccessError::Expired);
        }
        if !record.active {
            return Err(AccessError::Inactive);
        }
        Ok(record)
    }

    /// Atomically validate the share and consume one download slot
    pub async fn reserve(
        &self,
        share_id: &ShareId,
        now: DateTime<Utc>,
    ) -> Result<ShareRecord, AccessError> {
        let record = self
            .database
            .check_and_reserve_download(share_id, now)
            .await?;
        tracing::info!(
            share_id = %share_id,
            download_count = record.download_count,
            max_downloads = record.max_downloads,
            "download slot reserved"
        );
        Ok(record)
    }
}
