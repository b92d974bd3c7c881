//! Meta key/value area and the scan lock.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{Error, Result};

/// Unix timestamp of the last completed full scan.
pub const LAST_FULL_SCAN: &str = "last_full_scan";

const SCAN_LOCK: &str = "scan_lock";

/// Scan-lock holder, stored as JSON in the meta row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLock {
    pub pid: u32,
    pub ts: i64,
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    Ok(get(pool, key).await?.and_then(|v| v.parse().ok()))
}

/// Try to take the scan lock for this process.
///
/// A single conditional upsert: wins when no lock row exists or the holder's
/// timestamp has gone stale. Atomic without an explicit transaction, so a
/// losing contender gets its answer in one round trip.
pub async fn acquire_scan_lock(pool: &SqlitePool, now: i64, stale_sec: i64) -> Result<bool> {
    let lock = ScanLock {
        pid: std::process::id(),
        ts: now,
    };
    let value = serde_json::to_string(&lock)
        .map_err(|e| Error::Config(format!("scan lock encode: {e}")))?;

    let result = sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value \
         WHERE CAST(json_extract(meta.value, '$.ts') AS INTEGER) <= ?3",
    )
    .bind(SCAN_LOCK)
    .bind(&value)
    .bind(now - stale_sec)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Current lock holder, if any.
pub async fn scan_lock_holder(pool: &SqlitePool) -> Result<Option<ScanLock>> {
    Ok(get(pool, SCAN_LOCK)
        .await?
        .and_then(|v| serde_json::from_str(&v).ok()))
}

/// Release the lock, but only when this process still holds it.
pub async fn release_scan_lock(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "DELETE FROM meta WHERE key = ?1 \
         AND CAST(json_extract(value, '$.pid') AS INTEGER) = ?2",
    )
    .bind(SCAN_LOCK)
    .bind(std::process::id() as i64)
    .execute(pool)
    .await?;
    Ok(())
}
