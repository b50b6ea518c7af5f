//! SQLite persistence layer
//!
//! One module per entity, manual row decoding. The schema is created on
//! startup; see [`schema`].

pub mod batches;
pub mod cache;
pub mod datasets;
pub mod jobs;
pub mod models;
pub mod organizations;
pub mod schema;

use pulse_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if missing) the service database
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::init(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    // A single connection so every query sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    schema::init(&pool).await?;

    Ok(pool)
}
