//! Last-play tables and the on-air history ring.
//!
//! The picker writes a provisional stamp at selection time; the
//! `track-start` callback overwrites it with the on-air moment and appends
//! the one history row per play. Every write trims its tables to the
//! configured caps inside the same transaction.

use std::collections::HashMap;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::Result;

/// Which play table a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    Artist,
    Title,
    Path,
}

impl PlayKind {
    fn table_col(self) -> (&'static str, &'static str) {
        match self {
            PlayKind::Artist => ("artist_plays", "artist_norm"),
            PlayKind::Title => ("title_plays", "title_norm"),
            PlayKind::Path => ("path_plays", "path"),
        }
    }
}

/// Row caps applied on every play write.
#[derive(Debug, Clone, Copy)]
pub struct RetentionCaps {
    /// History ring size, and cap on the artist/title play tables.
    pub history_keep: i64,
    /// Cap on the path play table, oldest evicted first.
    pub history_keep_paths: i64,
}

pub async fn last_play(pool: &SqlitePool, kind: PlayKind, key: &str) -> Result<Option<i64>> {
    let (table, col) = kind.table_col();
    let sql = format!("SELECT ts FROM {table} WHERE {col} = ?");
    let ts = sqlx::query_scalar(&sql).bind(key).fetch_optional(pool).await?;
    Ok(ts)
}

/// Batched lookup over a sample's keys; one chunked query per table.
pub async fn last_plays(
    pool: &SqlitePool,
    kind: PlayKind,
    keys: &[&str],
) -> Result<HashMap<String, i64>> {
    let (table, col) = kind.table_col();
    let mut out = HashMap::with_capacity(keys.len());
    for chunk in keys.chunks(256) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT {col}, ts FROM {table} WHERE {col} IN ({placeholders})");
        let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
        for key in chunk {
            query = query.bind(*key);
        }
        for (key, ts) in query.fetch_all(pool).await? {
            out.insert(key, ts);
        }
    }
    Ok(out)
}

/// Provisional stamp at selection time. The later `track-start` overwrite
/// is authoritative; stamping here keeps a burst of rapid picks from all
/// converging on the same keys. No history row is written for a pick.
pub async fn stamp_selection(
    pool: &SqlitePool,
    path: Option<&str>,
    artist_norm: Option<&str>,
    title_norm: Option<&str>,
    ts: i64,
    caps: RetentionCaps,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    if let Some(key) = artist_norm {
        upsert_play(&mut tx, PlayKind::Artist, key, ts).await?;
    }
    if let Some(key) = title_norm {
        upsert_play(&mut tx, PlayKind::Title, key, ts).await?;
    }
    if let Some(key) = path {
        upsert_play(&mut tx, PlayKind::Path, key, ts).await?;
    }
    trim_play_tables(&mut tx, caps).await?;
    tx.commit().await?;
    Ok(())
}

/// Authoritative on-air record: play-table upserts plus one history row.
#[allow(clippy::too_many_arguments)]
pub async fn record_play(
    pool: &SqlitePool,
    path: &str,
    artist_raw: &str,
    title_raw: &str,
    artist_norm: Option<&str>,
    title_norm: Option<&str>,
    ts: i64,
    caps: RetentionCaps,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    if let Some(key) = artist_norm {
        upsert_play(&mut tx, PlayKind::Artist, key, ts).await?;
    }
    if let Some(key) = title_norm {
        upsert_play(&mut tx, PlayKind::Title, key, ts).await?;
    }
    upsert_play(&mut tx, PlayKind::Path, path, ts).await?;

    sqlx::query("INSERT INTO history (ts, path, artist_raw, title_raw) VALUES (?, ?, ?, ?)")
        .bind(ts)
        .bind(path)
        .bind(artist_raw)
        .bind(title_raw)
        .execute(&mut *tx)
        .await?;

    trim_play_tables(&mut tx, caps).await?;
    sqlx::query(
        "DELETE FROM history WHERE id NOT IN \
         (SELECT id FROM history ORDER BY ts DESC, id DESC LIMIT ?)",
    )
    .bind(caps.history_keep)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn upsert_play(
    tx: &mut Transaction<'_, Sqlite>,
    kind: PlayKind,
    key: &str,
    ts: i64,
) -> Result<()> {
    let (table, col) = kind.table_col();
    let sql = format!(
        "INSERT INTO {table} ({col}, ts) VALUES (?, ?) \
         ON CONFLICT({col}) DO UPDATE SET ts = excluded.ts"
    );
    sqlx::query(&sql).bind(key).bind(ts).execute(&mut **tx).await?;
    Ok(())
}

async fn trim_play_tables(tx: &mut Transaction<'_, Sqlite>, caps: RetentionCaps) -> Result<()> {
    let limits = [
        (PlayKind::Artist, caps.history_keep),
        (PlayKind::Title, caps.history_keep),
        (PlayKind::Path, caps.history_keep_paths),
    ];
    for (kind, keep) in limits {
        let (table, col) = kind.table_col();
        let sql = format!(
            "DELETE FROM {table} WHERE {col} NOT IN \
             (SELECT {col} FROM {table} ORDER BY ts DESC LIMIT ?)"
        );
        sqlx::query(&sql).bind(keep).execute(&mut **tx).await?;
    }
    Ok(())
}
