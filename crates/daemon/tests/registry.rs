use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use common::prelude::{BlobRef, ShareId};
use shroud_daemon::database::{Database, NewShare, RegistryError};

const MAX_DOWNLOADS: u32 = 5;
const CONTENDERS: usize = 20;

fn share(id: &str) -> NewShare {
    NewShare {
        share_id: Some(ShareId::parse(id).unwrap()),
        blob_ref: BlobRef::new("blob"),
        filename: "a.txt".into(),
        content_type: "text/plain".into(),
        private_key: "unused".into(),
        max_downloads: MAX_DOWNLOADS,
        ttl: Duration::from_secs(3600),
    }
}

async fn race_reservations(database: Database) {
    let id = database
        .create_share(share("contended"), Utc::now())
        .await
        .unwrap();

    let attempts = (0..CONTENDERS).map(|_| {
        let database = database.clone();
        let id = id.clone();
        tokio::spawn(async move { database.check_and_reserve_download(&id, Utc::now()).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let granted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(granted, MAX_DOWNLOADS as usize);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, RegistryError::QuotaExceeded)));

    let record = database.get_snapshot(&id).await.unwrap();
    assert_eq!(record.download_count, MAX_DOWNLOADS);
    assert!(!record.active);
}

#[tokio::test]
async fn concurrent_reservations_never_exceed_quota_in_memory() {
    race_reservations(Database::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn concurrent_reservations_never_exceed_quota_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let database = Database::open(&dir.path().join("db.sqlite")).await.unwrap();
    race_reservations(database).await;
}

#[tokio::test]
async fn registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");

    {
        let database = Database::open(&path).await.unwrap();
        let id = database.create_share(share("durable"), Utc::now()).await.unwrap();
        database.check_and_reserve_download(&id, Utc::now()).await.unwrap();
        database.close().await;
    }

    let database = Database::open(&path).await.unwrap();
    let record = database
        .get_snapshot(&ShareId::parse("durable").unwrap())
        .await
        .unwrap();
    assert_eq!(record.download_count, 1);
    assert!(record.active);
}
