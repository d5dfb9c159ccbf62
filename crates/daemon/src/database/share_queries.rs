use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::prelude::{BlobRef, ShareId};
use common::share::ShareIdError;

use super::types::DTimestamp;
use super::Database;

const SHARE_COLUMNS: &str = "share_id, blob_ref, filename, content_type, private_key, \
     max_downloads, download_count, active, stopped, link_published, expires_at, created_at";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("share not found: {0}")]
    NotFound(ShareId),
    #[error("share is no longer active")]
    Inactive,
    #[error("share has expired")]
    Expired,
    #[error("download limit reached")]
    QuotaExceeded,
    #[error("share id already in use: {0}")]
    DuplicateShare(ShareId),
    #[error("max_downloads must be at least 1")]
    InvalidQuota,
    #[error("ttl out of range")]
    InvalidTtl,
    #[error("invalid share id: {0}")]
    InvalidId(#[from] ShareIdError),
    #[error("malformed share row: {0}")]
    MalformedRow(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One share, decoded and validated from its row
#[derive(Clone)]
pub struct ShareRecord {
    pub share_id: ShareId,
    pub blob_ref: BlobRef,
    pub filename: String,
    pub content_type: String,
    /// PKCS#8 PEM, never logged
    pub private_key: String,
    pub max_downloads: u32,
    pub download_count: u32,
    pub active: bool,
    pub stopped: bool,
    pub link_published: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for ShareRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareRecord")
            .field("share_id", &self.share_id)
            .field("blob_ref", &self.blob_ref)
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("private_key", &"<redacted>")
            .field("max_downloads", &self.max_downloads)
            .field("download_count", &self.download_count)
            .field("active", &self.active)
            .field("stopped", &self.stopped)
            .field("link_published", &self.link_published)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl ShareRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a download could currently be reserved against this share
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.stopped && !self.is_expired(now) && self.remaining() > 0
    }

    pub fn remaining(&self) -> u32 {
        self.max_downloads.saturating_sub(self.download_count)
    }
}

impl TryFrom<&SqliteRow> for ShareRecord {
    type Error = RegistryError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let malformed = |e: sqlx::Error| RegistryError::MalformedRow(e.to_string());

        let share_id: String = row.try_get("share_id").map_err(malformed)?;
        let share_id = ShareId::parse(share_id)
            .map_err(|e| RegistryError::MalformedRow(format!("share_id: {}", e)))?;

        let blob_ref: String = row.try_get("blob_ref").map_err(malformed)?;
        if blob_ref.is_empty() {
            return Err(RegistryError::MalformedRow(format!(
                "share {} has an empty blob_ref",
                share_id
            )));
        }

        let max_downloads: i64 = row.try_get("max_downloads").map_err(malformed)?;
        let download_count: i64 = row.try_get("download_count").map_err(malformed)?;
        let max_downloads = u32::try_from(max_downloads)
            .ok()
            .filter(|max| *max > 0)
            .ok_or_else(|| {
                RegistryError::MalformedRow(format!(
                    "share {} has max_downloads {}",
                    share_id, max_downloads
                ))
            })?;
        let download_count = u32::try_from(download_count)
            .ok()
            .filter(|count| *count <= max_downloads)
            .ok_or_else(|| {
                RegistryError::MalformedRow(format!(
                    "share {} has download_count {} of {}",
                    share_id, download_count, max_downloads
                ))
            })?;

        let expires_at: DTimestamp = row.try_get("expires_at").map_err(malformed)?;
        let created_at: DTimestamp = row.try_get("created_at").map_err(malformed)?;

        Ok(Self {
            share_id,
            blob_ref: BlobRef::new(blob_ref),
            filename: row.try_get("filename").map_err(malformed)?,
            content_type: row.try_get("content_type").map_err(malformed)?,
            private_key: row.try_get("private_key").map_err(malformed)?,
            max_downloads,
            download_count,
            active: row.try_get("active").map_err(malformed)?,
            stopped: row.try_get("stopped").map_err(malformed)?,
            link_published: row.try_get("link_published").map_err(malformed)?,
            expires_at: expires_at.into(),
            created_at: created_at.into(),
        })
    }
}

/// Everything needed to register a freshly sealed upload
#[derive(Clone)]
pub struct NewShare {
    /// Caller supplied id, generated when absent
    pub share_id: Option<ShareId>,
    pub blob_ref: BlobRef,
    pub filename: String,
    pub content_type: String,
    pub private_key: String,
    pub max_downloads: u32,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredShare {
    pub share_id: ShareId,
    pub blob_ref: BlobRef,
}

impl Database {
    /// Register a share. Fails with [`RegistryError::DuplicateShare`]
    ///  if the id is already taken; the existing row is left untouched.
    pub async fn create_share(
        &self,
        share: NewShare,
        now: DateTime<Utc>,
    ) -> Result<ShareId, RegistryError> {
        if share.max_downloads == 0 {
            return Err(RegistryError::InvalidQuota);
        }
        let ttl = chrono::Duration::from_std(share.ttl).map_err(|_| RegistryError::InvalidTtl)?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(RegistryError::InvalidTtl)?;
        let share_id = match share.share_id {
            Some(id) => id,
            None => ShareId::generate()?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO shares (
                share_id, blob_ref, filename, content_type, private_key,
                max_downloads, download_count, active, stopped, link_published,
                expires_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1, 0, 0, ?7, ?8)
            "#,
        )
        .bind(share_id.as_str())
        .bind(share.blob_ref.as_str())
        .bind(&share.filename)
        .bind(&share.content_type)
        .bind(&share.private_key)
        .bind(share.max_downloads as i64)
        .bind(DTimestamp::from(expires_at))
        .bind(DTimestamp::from(now))
        .execute(&**self)
        .await;

        match result {
            Ok(_) => Ok(share_id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RegistryError::DuplicateShare(share_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate and consume one download slot in a single statement.
    ///
    /// The UPDATE only matches an active, unexpired share with quota left,
    ///  and flips `active` off when this reservation uses the last slot.
    ///  Concurrent callers are serialized by SQLite's writer lock, so at most
    ///  `max_downloads` of them ever match. When nothing matched, the row is
    ///  re-read only to report why.
    pub async fn check_and_reserve_download(
        &self,
        share_id: &ShareId,
        now: DateTime<Utc>,
    ) -> Result<ShareRecord, RegistryError> {
        let query = format!(
            r#"
            UPDATE shares
            SET download_count = download_count + 1,
                active = CASE WHEN download_count + 1 >= max_downloads THEN 0 ELSE 1 END
            WHERE share_id = ?1
              AND active = 1
              AND stopped = 0
              AND download_count < max_downloads
              AND expires_at > ?2
            RETURNING {}
            "#,
            SHARE_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(share_id.as_str())
            .bind(DTimestamp::from(now))
            .fetch_optional(&**self)
            .await?;

        if let Some(row) = row {
            return ShareRecord::try_from(&row);
        }

        let record = self
            .find_share(share_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(share_id.clone()))?;

        if record.stopped {
            return Err(RegistryError::Inactive);
        }
        if record.download_count >= record.max_downloads {
            return Err(RegistryError::QuotaExceeded);
        }
        if record.is_expired(now) {
            self.deactivate(share_id).await?;
            return Err(RegistryError::Expired);
        }
        Err(RegistryError::Inactive)
    }

    /// Deactivate a share and hand back its blob for deletion.
    ///  Only the first call succeeds; later calls report `NotFound`.
    pub async fn stop_share(&self, share_id: &ShareId) -> Result<BlobRef, RegistryError> {
        let blob_ref: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE shares
            SET active = 0, stopped = 1
            WHERE share_id = ?1 AND stopped = 0
            RETURNING blob_ref
            "#,
        )
        .bind(share_id.as_str())
        .fetch_optional(&**self)
        .await?;

        blob_ref
            .map(BlobRef::new)
            .ok_or_else(|| RegistryError::NotFound(share_id.clone()))
    }

    /// Shares past their expiry that still hold a blob
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredShare>, RegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT share_id, blob_ref
            FROM shares
            WHERE expires_at <= ?1 AND stopped = 0
            ORDER BY expires_at ASC
            "#,
        )
        .bind(DTimestamp::from(now))
        .fetch_all(&**self)
        .await?;

        rows.iter()
            .map(|row| {
                let share_id: String = row
                    .try_get("share_id")
                    .map_err(|e| RegistryError::MalformedRow(e.to_string()))?;
                let blob_ref: String = row
                    .try_get("blob_ref")
                    .map_err(|e| RegistryError::MalformedRow(e.to_string()))?;
                Ok(ExpiredShare {
                    share_id: ShareId::parse(share_id)?,
                    blob_ref: BlobRef::new(blob_ref),
                })
            })
            .collect()
    }

    pub async fn find_share(&self, share_id: &ShareId) -> Result<Option<ShareRecord>, RegistryError> {
        let query = format!("SELECT {} FROM shares WHERE share_id = ?1", SHARE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(share_id.as_str())
            .fetch_optional(&**self)
            .await?;

        row.as_ref().map(ShareRecord::try_from).transpose()
    }

    pub async fn get_snapshot(&self, share_id: &ShareId) -> Result<ShareRecord, RegistryError> {
        self.find_share(share_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(share_id.clone()))
    }

    pub async fn share_exists(&self, share_id: &ShareId) -> Result<bool, RegistryError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM shares WHERE share_id = ?1")
            .bind(share_id.as_str())
            .fetch_optional(&**self)
            .await?;
        Ok(found.is_some())
    }

    /// Whether `/status` should report the share as live. Unknown ids are
    ///  simply not active.
    pub async fn is_active(
        &self,
        share_id: &ShareId,
        now: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .find_share(share_id)
            .await?
            .map(|record| record.active && !record.is_expired(now))
            .unwrap_or(false))
    }

    /// Every share, latest expiry first
    pub async fn list_history(&self) -> Result<Vec<ShareRecord>, RegistryError> {
        let query = format!(
            "SELECT {} FROM shares ORDER BY expires_at DESC, share_id ASC",
            SHARE_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&**self).await?;
        rows.iter().map(ShareRecord::try_from).collect()
    }

    pub async fn mark_link_published(&self, share_id: &ShareId) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE shares SET link_published = 1 WHERE share_id = ?1")
            .bind(share_id.as_str())
            .execute(&**self)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(share_id.clone()));
        }
        Ok(())
    }

    async fn deactivate(&self, share_id: &ShareId) -> Result<(), RegistryError> {
        sqlx::query("UPDATE shares SET active = 0 WHERE share_id = ?1 AND active = 1")
            .bind(share_id.as_str())
            .execute(&**self)
            .await?;
        Ok(())
    }
}
