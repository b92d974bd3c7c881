//! Store open and schema migration.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::Result;

/// Current schema version, stamped after migration.
const SCHEMA_VERSION: i64 = 1;

/// Open the store, creating and migrating it if needed.
///
/// WAL keeps concurrent readers off the single writer's back; the busy
/// timeout bounds every store touch on the pick path. Both are set as
/// connect options so every pooled connection carries them.
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(2_000))
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options).await?;

    migrate(&pool).await?;

    if newly_created {
        info!("initialized new store at {}", db_path.display());
    } else {
        debug!("opened store at {}", db_path.display());
    }
    Ok(pool)
}

/// Compact the store file in place.
pub async fn vacuum(pool: &SqlitePool) -> Result<()> {
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}

/// Idempotent migration set; safe to run on every open.
async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per scanned audio file; id is the rowid used for sampling.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            artist_raw TEXT NOT NULL DEFAULT '',
            title_raw TEXT NOT NULL DEFAULT '',
            artist_norm TEXT,
            title_norm TEXT,
            kind TEXT NOT NULL DEFAULT 'audio',
            last_scanned INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_artist_norm ON files(artist_norm)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_title_norm ON files(title_norm)")
        .execute(pool)
        .await?;

    // Last on-air start time by normalized key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artist_plays (
            artist_norm TEXT PRIMARY KEY,
            ts INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS title_plays (
            title_norm TEXT PRIMARY KEY,
            ts INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS path_plays (
            path TEXT PRIMARY KEY,
            ts INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only on-air log, trimmed to a configured size.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            path TEXT NOT NULL,
            artist_raw TEXT,
            title_raw TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_ts ON history(ts)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}
