//! Relational store: connection pool, schema migrations and per-table queries.

pub mod logs;
pub mod messages;
mod migrator;
pub mod pagination;
pub mod people;
pub mod reports;

use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use migrator::{DatabaseMigrator, MigrationError};

/// The application's connection pool.
pub type Db = sqlx::SqlitePool;

/// Open (creating if missing) the database at `url`.
pub async fn establish_pool(url: &str) -> Result<Db> {
    let opts = SqliteConnectOptions::from_str(url)
        .context("failed to parse database options")?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to connect to {url}"))
}

/// `true` when `err` is a unique-constraint violation raised at commit time.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// An in-memory database with the schema applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> Db {
    // Every in-memory connection is its own database, so pin the pool to one.
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(true);
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("in-memory database should open");

    DatabaseMigrator::new(db.clone())
        .migrate_to_latest()
        .await
        .expect("migrations should apply");
    db
}
