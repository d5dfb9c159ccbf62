mod share_queries;
mod sqlite;
mod types;

use std::ops::Deref;
use std::path::Path;

use sqlx::SqlitePool;

pub use share_queries::{ExpiredShare, NewShare, RegistryError, ShareRecord};

/// Share registry backed by SQLite.
///  Every lifecycle mutation is a single statement, so SQLite's
///  writer lock serializes them per row without explicit transactions.
#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    /// Open (creating if missing) a database file and run migrations
    pub async fn open(path: &Path) -> Result<Self, DatabaseSetupError> {
        let pool = sqlite::connect_file(path).await?;
        sqlite::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// A private in-memory database, gone when the handle is dropped
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let pool = sqlite::connect_memory().await?;
        sqlite::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }

    /// Cheap round trip used by readiness checks
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("unable to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}
