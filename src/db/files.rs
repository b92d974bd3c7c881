//! File rows: the scanned library cache.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::{Row, SqlitePool};

use crate::Result;

/// One scanned audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub path: String,
    pub artist_raw: String,
    pub title_raw: String,
    pub artist_norm: Option<String>,
    pub title_norm: Option<String>,
    pub kind: String,
    pub last_scanned: i64,
}

/// Candidate row handed to the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub artist_norm: Option<String>,
    pub title_norm: Option<String>,
}

pub async fn upsert_file(pool: &SqlitePool, row: &FileRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO files (path, artist_raw, title_raw, artist_norm, title_norm, kind, last_scanned)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            artist_raw = excluded.artist_raw,
            title_raw = excluded.title_raw,
            artist_norm = excluded.artist_norm,
            title_norm = excluded.title_norm,
            kind = excluded.kind,
            last_scanned = excluded.last_scanned
        "#,
    )
    .bind(&row.path)
    .bind(&row.artist_raw)
    .bind(&row.title_raw)
    .bind(&row.artist_norm)
    .bind(&row.title_norm)
    .bind(&row.kind)
    .bind(row.last_scanned)
    .execute(pool)
    .await?;
    Ok(())
}

/// Bump `last_scanned` on an unchanged file so the missing-row sweep keeps it.
pub async fn touch(pool: &SqlitePool, path: &str, last_scanned: i64) -> Result<()> {
    sqlx::query("UPDATE files SET last_scanned = ? WHERE path = ?")
        .bind(last_scanned)
        .bind(path)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn last_scanned(pool: &SqlitePool, path: &str) -> Result<Option<i64>> {
    let ts = sqlx::query_scalar("SELECT last_scanned FROM files WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(ts)
}

pub async fn count_files(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete rows not observed by the scan pass that started at `since_ts`.
pub async fn delete_missing(pool: &SqlitePool, since_ts: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM files WHERE last_scanned < ?")
        .bind(since_ts)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// All rows ordered by path.
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<FileRow>> {
    let rows = sqlx::query(
        r#"
        SELECT path, artist_raw, title_raw, artist_norm, title_norm, kind, last_scanned
        FROM files
        ORDER BY path
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| FileRow {
            path: row.get("path"),
            artist_raw: row.get("artist_raw"),
            title_raw: row.get("title_raw"),
            artist_norm: row.get("artist_norm"),
            title_norm: row.get("title_norm"),
            kind: row.get("kind"),
            last_scanned: row.get("last_scanned"),
        })
        .collect())
}

/// Up to `n` randomly chosen candidates, in random order.
///
/// Draws random rowids from the known id range and requeries misses rather
/// than sorting the whole table by a random key; rowids stay dense unless
/// the library churns heavily, so a few rounds cover the sample. Small
/// tables are loaded whole and shuffled.
pub async fn sample_paths(pool: &SqlitePool, n: usize) -> Result<Vec<Candidate>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let (min_id, max_id, count): (Option<i64>, Option<i64>, i64) =
        sqlx::query_as("SELECT MIN(id), MAX(id), COUNT(*) FROM files")
            .fetch_one(pool)
            .await?;
    let (Some(min_id), Some(max_id)) = (min_id, max_id) else {
        return Ok(Vec::new());
    };

    if count as usize <= n {
        let rows = sqlx::query("SELECT path, artist_norm, title_norm FROM files")
            .fetch_all(pool)
            .await?;
        let mut all: Vec<Candidate> = rows.into_iter().map(candidate_from_row).collect();
        all.shuffle(&mut rand::thread_rng());
        return Ok(all);
    }

    let span = (max_id - min_id + 1) as u64;
    let mut rng = rand::thread_rng();
    let mut drawn: HashSet<i64> = HashSet::with_capacity(n * 2);
    let mut picked: Vec<Candidate> = Vec::with_capacity(n);

    for _round in 0..8 {
        if picked.len() >= n || drawn.len() as u64 >= span {
            break;
        }
        let need = n - picked.len();
        let mut ids: Vec<i64> = Vec::with_capacity(need);
        while ids.len() < need && (drawn.len() as u64) < span {
            let id = rng.gen_range(min_id..=max_id);
            if drawn.insert(id) {
                ids.push(id);
            }
        }

        for chunk in ids.chunks(256) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id, path, artist_norm, title_norm FROM files WHERE id IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            let rows = query.fetch_all(pool).await?;

            let mut by_id: HashMap<i64, Candidate> = rows
                .into_iter()
                .map(|row| (row.get::<i64, _>("id"), candidate_from_row(row)))
                .collect();
            // Preserve the random draw order.
            for id in chunk {
                if let Some(cand) = by_id.remove(id) {
                    picked.push(cand);
                }
            }
        }
    }

    picked.truncate(n);
    Ok(picked)
}

fn candidate_from_row(row: sqlx::sqlite::SqliteRow) -> Candidate {
    Candidate {
        path: row.get("path"),
        artist_norm: row.get("artist_norm"),
        title_norm: row.get("title_norm"),
    }
}
