//! Library scanner: reconciles the file table with the on-disk music root.
//!
//! The full walk runs either in the foreground (`rebuild-cache`) or in a
//! fully detached child process spawned from the pick path. Every row write
//! is its own transaction, so interruption at any point leaves a coherent
//! store for concurrent pickers.

use std::process::Stdio;
use std::time::UNIX_EPOCH;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::files::FileRow;
use crate::db::{files, meta};
use crate::{normalize, probe, Error, Result};

/// Counters reported after a completed scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    /// Audio files observed on disk.
    pub seen: u64,
    /// Rows inserted or re-probed.
    pub updated: u64,
    /// Rows deleted because their file vanished.
    pub removed: u64,
}

/// One full reconciliation pass under the scan lock.
///
/// Fails with `ScanLockHeld` when another scanner owns a fresh lock; a
/// stale lock (holder older than `lock_stale_sec`) is reclaimed.
pub async fn run_scan(pool: &SqlitePool, cfg: &Config) -> Result<ScanSummary> {
    let start_ts = crate::now_ts();
    if !meta::acquire_scan_lock(pool, start_ts, cfg.lock_stale_sec).await? {
        let holder = meta::scan_lock_holder(pool)
            .await?
            .map(|l| l.pid)
            .unwrap_or(0);
        return Err(Error::ScanLockHeld(holder));
    }

    let outcome = scan_pass(pool, cfg, start_ts).await;
    if let Err(e) = meta::release_scan_lock(pool).await {
        warn!("failed to release scan lock: {e}");
    }

    let summary = outcome?;
    info!(
        seen = summary.seen,
        updated = summary.updated,
        removed = summary.removed,
        "library scan complete"
    );
    Ok(summary)
}

async fn scan_pass(pool: &SqlitePool, cfg: &Config, start_ts: i64) -> Result<ScanSummary> {
    let mut summary = ScanSummary::default();

    for entry in WalkDir::new(&cfg.music_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !cfg.is_audio_path(entry.path()) {
            continue;
        }
        let path = entry.path();
        let Some(path_str) = path.to_str() else {
            warn!("skipping non-UTF-8 path: {}", path.display());
            continue;
        };
        summary.seen += 1;

        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if let Some(prev) = files::last_scanned(pool, path_str).await? {
            if mtime <= prev {
                files::touch(pool, path_str, start_ts).await?;
                continue;
            }
        }

        let tags = probe::probe_tags(path, cfg.ffprobe_timeout).await;
        let artist_norm = normalize::artist_key(&tags.artist, cfg.unknown_artist_bucket);
        let title_norm = normalize::title_key(&tags.title);
        let row = FileRow {
            path: path_str.to_string(),
            artist_raw: tags.artist,
            title_raw: tags.title,
            artist_norm,
            title_norm,
            kind: Config::ext_family(path),
            last_scanned: start_ts,
        };
        files::upsert_file(pool, &row).await?;
        summary.updated += 1;
    }

    summary.removed = files::delete_missing(pool, start_ts).await?;
    meta::set(pool, meta::LAST_FULL_SCAN, &start_ts.to_string()).await?;
    Ok(summary)
}

/// Launch the hidden `internal-rescan` subcommand as a fully detached
/// child: no inherited stdio, its own process group, never awaited. The
/// child re-checks the scan lock itself and exits quietly when it loses.
pub fn spawn_detached_rescan() {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("cannot resolve current executable, skipping rescan: {e}");
            return;
        }
    };

    let mut cmd = std::process::Command::new(exe);
    cmd.arg("internal-rescan")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    match cmd.spawn() {
        Ok(child) => debug!(pid = child.id(), "spawned background rescan"),
        Err(e) => warn!("failed to spawn background rescan: {e}"),
    }
}
