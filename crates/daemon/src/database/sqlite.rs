use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::DatabaseSetupError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FILE_CONNECTIONS: u32 = 8;

pub async fn connect_file(path: &Path) -> Result<SqlitePool, DatabaseSetupError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_FILE_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn connect_memory() -> Result<SqlitePool, DatabaseSetupError> {
    let options = SqliteConnectOptions::new().filename(":memory:");

    // every new connection would be a fresh, empty database, so pin exactly one
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), DatabaseSetupError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
