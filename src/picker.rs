//! Track selection: strict separation pass, least-violating fallback, and
//! the cold-path filesystem dart.
//!
//! `pick_next` never fails and never blocks beyond the store's busy
//! timeout: an unavailable store degrades to the dart, a busy store skips
//! the optional play stamp, and an empty library yields an empty string
//! (the streaming host substitutes silence).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::files::Candidate;
use crate::db::plays::{PlayKind, RetentionCaps};
use crate::db::{self, files, meta, plays};
use crate::{normalize, probe, scanner};

/// Last-play timestamps for one sample, keyed by normalized key or path.
#[derive(Debug, Default)]
pub struct PlayState {
    pub artist: HashMap<String, i64>,
    pub title: HashMap<String, i64>,
    pub path: HashMap<String, i64>,
}

/// Pick the next track: the chosen absolute path, or an empty string when
/// no track can be found.
pub async fn pick_next(cfg: &Config) -> String {
    let pool = match db::open(&cfg.db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("store unavailable, falling back to filesystem dart: {e}");
            return dart_pick(cfg, None).await.unwrap_or_default();
        }
    };

    let count = match files::count_files(&pool).await {
        Ok(count) => count,
        Err(e) => {
            warn!("file count failed, treating cache as empty: {e}");
            0
        }
    };
    let last_scan = meta::get_i64(&pool, meta::LAST_FULL_SCAN)
        .await
        .ok()
        .flatten()
        .unwrap_or(0);
    let now = crate::now_ts();
    // A store that has never completed a scan carries last_full_scan 0 and
    // is always past the horizon; a fresh scan that found nothing must not
    // respawn the scanner on every pick.
    if now - last_scan > cfg.rescan_sec {
        debug!(count, last_scan, "cache stale, triggering background rescan");
        scanner::spawn_detached_rescan();
    }

    if count == 0 {
        return dart_pick(cfg, Some(&pool)).await.unwrap_or_default();
    }

    let sample = match files::sample_paths(&pool, cfg.sample_n).await {
        Ok(sample) => sample,
        Err(e) => {
            warn!("sampling failed: {e}");
            Vec::new()
        }
    };
    if sample.is_empty() {
        return dart_pick(cfg, Some(&pool)).await.unwrap_or_default();
    }

    let state = match load_play_state(&pool, &sample, cfg).await {
        Ok(state) => state,
        Err(e) => {
            warn!("last-play lookup failed, ignoring separation state: {e}");
            PlayState::default()
        }
    };

    match choose(&sample, &state, now, cfg) {
        Some(choice) => {
            stamp(
                &pool,
                cfg,
                &choice.path,
                choice.artist_norm.as_deref(),
                choice.title_norm.as_deref(),
                now,
            )
            .await;
            choice.path.clone()
        }
        None => String::new(),
    }
}

/// Two-pass selection over a sample.
///
/// Strict pass: first candidate in sample order with every separation
/// window satisfied. Fallback: the candidate whose most recent involved
/// play is furthest in the past (missing plays count as epoch), ties to
/// the lexicographically smaller path.
pub fn choose<'a>(
    sample: &'a [Candidate],
    state: &PlayState,
    now: i64,
    cfg: &Config,
) -> Option<&'a Candidate> {
    for cand in sample {
        if separation_ok(cand, state, now, cfg) {
            return Some(cand);
        }
    }

    sample.iter().min_by(|a, b| {
        violation_score(a, state, cfg)
            .cmp(&violation_score(b, state, cfg))
            .then_with(|| a.path.cmp(&b.path))
    })
}

fn separation_ok(cand: &Candidate, state: &PlayState, now: i64, cfg: &Config) -> bool {
    if let Some(artist) = &cand.artist_norm {
        if let Some(ts) = state.artist.get(artist) {
            if now - ts <= cfg.artist_sep_sec {
                return false;
            }
        }
    }
    if let Some(title) = &cand.title_norm {
        if let Some(ts) = state.title.get(title) {
            if now - ts <= cfg.title_sep_sec {
                return false;
            }
        }
    }
    if cfg.track_sep_sec > 0 {
        if let Some(ts) = state.path.get(&cand.path) {
            if now - ts <= cfg.track_sep_sec {
                return false;
            }
        }
    }
    true
}

/// Most recent last-play timestamp across the candidate's constraints.
fn violation_score(cand: &Candidate, state: &PlayState, cfg: &Config) -> i64 {
    let mut score = 0;
    if let Some(artist) = &cand.artist_norm {
        score = score.max(state.artist.get(artist).copied().unwrap_or(0));
    }
    if let Some(title) = &cand.title_norm {
        score = score.max(state.title.get(title).copied().unwrap_or(0));
    }
    if cfg.track_sep_sec > 0 {
        score = score.max(state.path.get(&cand.path).copied().unwrap_or(0));
    }
    score
}

async fn load_play_state(
    pool: &SqlitePool,
    sample: &[Candidate],
    cfg: &Config,
) -> crate::Result<PlayState> {
    let artists: Vec<&str> = sample
        .iter()
        .filter_map(|c| c.artist_norm.as_deref())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let titles: Vec<&str> = sample
        .iter()
        .filter_map(|c| c.title_norm.as_deref())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let mut state = PlayState {
        artist: plays::last_plays(pool, PlayKind::Artist, &artists).await?,
        title: plays::last_plays(pool, PlayKind::Title, &titles).await?,
        path: HashMap::new(),
    };
    if cfg.track_sep_sec > 0 {
        let paths: Vec<&str> = sample.iter().map(|c| c.path.as_str()).collect();
        state.path = plays::last_plays(pool, PlayKind::Path, &paths).await?;
    }
    Ok(state)
}

/// Cold-path selection straight off the filesystem, with a best-effort
/// provisional stamp when a store is on hand.
async fn dart_pick(cfg: &Config, pool: Option<&SqlitePool>) -> Option<String> {
    let path = quick_random_dart(cfg)?;
    let path_str = path.to_string_lossy().into_owned();
    if let Some(pool) = pool {
        let tags = probe::probe_tags(&path, cfg.ffprobe_timeout).await;
        let artist_norm = normalize::artist_key(&tags.artist, cfg.unknown_artist_bucket);
        let title_norm = normalize::title_key(&tags.title);
        stamp(
            pool,
            cfg,
            &path_str,
            artist_norm.as_deref(),
            title_norm.as_deref(),
            crate::now_ts(),
        )
        .await;
    }
    Some(path_str)
}

/// Sample the music root without the store: shuffle top-level entries, try
/// loose files first, then peek into a handful of subdirectories, then
/// fall back to the first file of a shallow walk.
pub fn quick_random_dart(cfg: &Config) -> Option<PathBuf> {
    let mut rng = rand::thread_rng();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&cfg.music_dir)
        .map(|it| it.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.shuffle(&mut rng);
    if cfg.top_n_dirs > 0 {
        entries.truncate(cfg.top_n_dirs);
    }

    let loose: Vec<&PathBuf> = entries
        .iter()
        .filter(|p| p.is_file() && cfg.is_audio_path(p))
        .collect();
    if let Some(path) = loose.choose(&mut rng) {
        return Some((**path).clone());
    }

    for dir in entries.iter().filter(|p| p.is_dir()) {
        let files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(it) => it
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && cfg.is_audio_path(p))
                .take(cfg.files_per_dir_try)
                .collect(),
            Err(_) => continue,
        };
        if let Some(path) = files.choose(&mut rng) {
            return Some(path.clone());
        }
    }

    walkdir::WalkDir::new(&cfg.music_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && cfg.is_audio_path(e.path()))
        .map(|e| e.into_path())
}

/// Best-effort provisional play stamp; a busy store never blocks the pick.
async fn stamp(
    pool: &SqlitePool,
    cfg: &Config,
    path: &str,
    artist_norm: Option<&str>,
    title_norm: Option<&str>,
    now: i64,
) {
    let track_path = (cfg.track_sep_sec > 0).then_some(path);
    let caps = RetentionCaps {
        history_keep: cfg.history_keep,
        history_keep_paths: cfg.history_keep_paths,
    };
    if let Err(e) = plays::stamp_selection(pool, track_path, artist_norm, title_norm, now, caps).await
    {
        if e.is_busy() {
            debug!("store busy, skipping provisional play stamp");
        } else {
            warn!("skipping provisional play stamp: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            db_path: PathBuf::from("/tmp/unused.db"),
            music_dir: PathBuf::from("/tmp/unused"),
            artist_sep_sec: 45 * 60,
            title_sep_sec: 180 * 60,
            track_sep_sec: 0,
            rescan_sec: 86_400,
            lock_stale_sec: 3_600,
            top_n_dirs: 64,
            files_per_dir_try: 128,
            sample_n: 2_000,
            ffprobe_timeout: Duration::from_millis(800),
            scan_exts: vec![".mp3".into()],
            unknown_artist_bucket: true,
            history_keep: 10_000,
            history_keep_paths: 20_000,
        }
    }

    fn cand(path: &str, artist: &str, title: &str) -> Candidate {
        Candidate {
            path: path.to_string(),
            artist_norm: Some(artist.to_string()),
            title_norm: Some(title.to_string()),
        }
    }

    #[test]
    fn strict_pass_takes_first_satisfying_in_sample_order() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![
            cand("/m/x1.mp3", "x", "t1"),
            cand("/m/y.mp3", "y", "t2"),
            cand("/m/z.mp3", "z", "t3"),
        ];
        let mut state = PlayState::default();
        // x played a minute ago; y and z untouched.
        state.artist.insert("x".into(), now - 60);

        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/y.mp3");
    }

    #[test]
    fn strict_pass_respects_title_window() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![cand("/m/a.mp3", "a", "same"), cand("/m/b.mp3", "b", "same")];
        let mut state = PlayState::default();
        // Title aired two hours ago: inside the 180-minute window for both.
        state.title.insert("same".into(), now - 2 * 3600);
        // Fallback applies; both violate equally, so the lower path wins.
        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/a.mp3");
    }

    #[test]
    fn fallback_prefers_longest_silent_offender() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![
            cand("/m/recent.mp3", "recent", "t1"),
            cand("/m/older.mp3", "older", "t2"),
        ];
        let mut state = PlayState::default();
        state.artist.insert("recent".into(), now - 60);
        state.artist.insert("older".into(), now - 600);
        // Titles also inside their windows so the strict pass fails.
        state.title.insert("t1".into(), now - 60);
        state.title.insert("t2".into(), now - 600);

        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/older.mp3");
    }

    #[test]
    fn fallback_tie_breaks_on_lexicographic_path() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![
            cand("/m/b.mp3", "same", "same"),
            cand("/m/a.mp3", "same", "same"),
            cand("/m/c.mp3", "same", "same"),
        ];
        let mut state = PlayState::default();
        state.artist.insert("same".into(), now - 10);
        state.title.insert("same".into(), now - 10);

        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/a.mp3");
    }

    #[test]
    fn missing_plays_count_as_epoch_in_fallback() {
        let cfg = test_config();
        let now = 1_000_000;
        // Both artists recent, but the never-played title makes b the
        // least-violating candidate over a's freshly-played title.
        let sample = vec![cand("/m/a.mp3", "x", "ta"), cand("/m/b.mp3", "x", "tb")];
        let mut state = PlayState::default();
        state.artist.insert("x".into(), now - 60);
        state.title.insert("ta".into(), now - 30);

        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/b.mp3");
    }

    #[test]
    fn track_separation_disabled_ignores_path_plays() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![cand("/m/a.mp3", "a", "t")];
        let mut state = PlayState::default();
        state.path.insert("/m/a.mp3".into(), now - 1);

        // track_sep_sec == 0: path history is invisible to the strict pass.
        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/a.mp3");
    }

    #[test]
    fn track_separation_enabled_excludes_recent_path() {
        let mut cfg = test_config();
        cfg.track_sep_sec = 300;
        let now = 1_000_000;
        let sample = vec![cand("/m/a.mp3", "a", "ta"), cand("/m/b.mp3", "b", "tb")];
        let mut state = PlayState::default();
        state.path.insert("/m/a.mp3".into(), now - 10);

        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/b.mp3");
    }

    #[test]
    fn candidate_without_artist_key_carries_no_artist_constraint() {
        let cfg = test_config();
        let now = 1_000_000;
        let sample = vec![Candidate {
            path: "/m/untagged.mp3".to_string(),
            artist_norm: None,
            title_norm: None,
        }];
        let state = PlayState::default();
        let chosen = choose(&sample, &state, now, &cfg).unwrap();
        assert_eq!(chosen.path, "/m/untagged.mp3");
    }

    #[test]
    fn empty_sample_yields_none() {
        let cfg = test_config();
        assert!(choose(&[], &PlayState::default(), 0, &cfg).is_none());
    }
}
