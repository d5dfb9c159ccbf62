use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use common::prelude::DynBlobStore;

use crate::database::{Database, RegistryError};

/// Outcome of a single pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired shares found
    pub candidates: usize,
    /// Shares stopped by this pass
    pub stopped: usize,
    /// Blobs whose delete failed; their shares are stopped anyway
    pub orphaned_blobs: usize,
}

/// Periodic reclamation of expired shares.
///  Holds no registry lock while talking to the blob store: each entry is
///  a blob delete followed by an independent single-row stop.
#[derive(Debug, Clone)]
pub struct Sweeper {
    database: Database,
    blobs: DynBlobStore,
    interval: Duration,
}

impl Sweeper {
    pub fn new(database: Database, blobs: DynBlobStore, interval: Duration) -> Self {
        Self {
            database,
            blobs,
            interval,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, RegistryError> {
        let expired = self.database.list_expired(now).await?;
        let mut report = SweepReport {
            candidates: expired.len(),
            ..Default::default()
        };

        for share in expired {
            if let Err(e) = self.blobs.delete(&share.blob_ref).await {
                tracing::warn!(
                    share_id = %share.share_id,
                    blob_ref = %share.blob_ref,
                    error = %e,
                    "failed to delete expired blob, leaving it orphaned"
                );
                report.orphaned_blobs += 1;
            }

            match self.database.stop_share(&share.share_id).await {
                Ok(_) => report.stopped += 1,
                // stopped concurrently through the API
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(share_id = %share.share_id, error = %e, "failed to stop expired share");
                }
            }
        }

        Ok(report)
    }

    /// Sweep on a fixed interval until shutdown. The first pass runs immediately.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report.candidates > 0 => {
                            tracing::info!(
                                candidates = report.candidates,
                                stopped = report.stopped,
                                orphaned_blobs = report.orphaned_blobs,
                                "expiry sweep finished"
                            );
                        }
                        Ok(_) => tracing::trace!("expiry sweep found nothing"),
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use common::blobs::MemoryBlobStore;
    use common::prelude::{BlobRef, BlobStore, BlobStoreError, ShareId};

    use super::*;
    use crate::database::NewShare;

    async fn add_share(db: &Database, blobs: &dyn BlobStore, id: &str, ttl: Duration) -> BlobRef {
        let blob_ref = blobs.put(Bytes::from(id.to_string())).await.unwrap();
        db.create_share(
            NewShare {
                share_id: Some(ShareId::parse(id).unwrap()),
                blob_ref: blob_ref.clone(),
                filename: "f".into(),
                content_type: "text/plain".into(),
                private_key: "pem".into(),
                max_downloads: 1,
                ttl,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        blob_ref
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_only() {
        let db = Database::in_memory().await.unwrap();
        let blobs = MemoryBlobStore::new();
        let expired_ref = add_share(&db, &blobs, "expired", Duration::ZERO).await;
        let live_ref = add_share(&db, &blobs, "live", Duration::from_secs(3600)).await;

        let sweeper = Sweeper::new(db.clone(), Arc::new(blobs.clone()), Duration::from_secs(3600));
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                candidates: 1,
                stopped: 1,
                orphaned_blobs: 0
            }
        );
        assert!(!blobs.contains(&expired_ref));
        assert!(blobs.contains(&live_ref));

        let record = db
            .get_snapshot(&ShareId::parse("expired").unwrap())
            .await
            .unwrap();
        assert!(record.stopped && !record.active);

        // nothing left to do on the next pass
        let again = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[derive(Debug)]
    struct FailingDeletes(MemoryBlobStore);

    #[async_trait]
    impl BlobStore for FailingDeletes {
        async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError> {
            self.0.put(data).await
        }

        async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
            self.0.get(blob_ref).await
        }

        async fn delete(&self, _blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
            Err(BlobStoreError::Unavailable("disk on fire".into()))
        }

        async fn ping(&self) -> Result<(), BlobStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_delete_still_stops_share() {
        let db = Database::in_memory().await.unwrap();
        let blobs = FailingDeletes(MemoryBlobStore::new());
        add_share(&db, &blobs, "stuck", Duration::ZERO).await;

        let sweeper = Sweeper::new(db.clone(), Arc::new(blobs), Duration::from_secs(3600));
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.orphaned_blobs, 1);
        assert_eq!(report.stopped, 1);
        assert!(db.list_expired(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let db = Database::in_memory().await.unwrap();
        let sweeper = Sweeper::new(
            db,
            Arc::new(MemoryBlobStore::new()),
            Duration::from_secs(3600),
        );
        let (tx, rx) = watch::channel(());
        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
