//! Database migration management.

use sqlx::{SqlitePool, migrate::Migrator};
use thiserror::Error;
use tracing::info;

/// Migrations embedded from `./migrations` at compile time.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Error type for migration-related issues.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),
}

/// Applies the embedded schema migrations to a pool.
pub struct DatabaseMigrator {
    /// SQLite connection pool.
    db: SqlitePool,
}

impl DatabaseMigrator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Migrates the database to the latest migration.
    pub async fn migrate_to_latest(&self) -> Result<(), MigrationError> {
        MIGRATOR.run(&self.db).await?;
        info!(
            "database schema at migration {}",
            MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default()
        );
        Ok(())
    }
}
