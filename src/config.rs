//! Environment configuration.
//!
//! Every knob is an `LS_*` environment variable with a compiled default.
//! Malformed values fall back to the default with a warning rather than
//! failing startup; the caller is a live audio pipeline.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Store file path (`LS_DB`).
    pub db_path: PathBuf,
    /// Root of the music library (`LS_MUSIC_DIR`).
    pub music_dir: PathBuf,
    /// Artist separation window in seconds (`LS_ARTIST_SEP_MIN` * 60).
    pub artist_sep_sec: i64,
    /// Title separation window in seconds (`LS_TITLE_SEP_MIN` * 60).
    pub title_sep_sec: i64,
    /// Per-file separation window in seconds; 0 disables (`LS_TRACK_SEP_SEC`).
    pub track_sep_sec: i64,
    /// Trigger a background rescan when the cache is older (`LS_RESCAN_SEC`).
    pub rescan_sec: i64,
    /// Scan lock considered abandoned after this (`LS_LOCK_STALE_SEC`).
    pub lock_stale_sec: i64,
    /// Cold-path subdirectory sample cap (`LS_TOP_N_DIRS`).
    pub top_n_dirs: usize,
    /// Cold-path files-per-directory cap (`LS_FILES_PER_DIR_TRY`).
    pub files_per_dir_try: usize,
    /// Warm-path sample size (`LS_SAMPLE_N`).
    pub sample_n: usize,
    /// Wall-clock bound on one tag probe (`LS_FFPROBE_TIMEOUT_S`).
    pub ffprobe_timeout: Duration,
    /// Dotted, lowercased audio extensions (`LS_SCAN_EXTS`).
    pub scan_exts: Vec<String>,
    /// Bucket empty artists under one shared key (`LS_UNKNOWN_ARTIST_BUCKET`).
    pub unknown_artist_bucket: bool,
    /// Max history rows, and cap on the artist/title play tables
    /// (`LS_HISTORY_KEEP`).
    pub history_keep: i64,
    /// Max path-play rows retained, oldest evicted (`LS_HISTORY_KEEP_PATHS`).
    pub history_keep_paths: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: PathBuf::from(env_str("LS_DB", "/var/lib/liquidsoap/liquidsoap.db")),
            music_dir: PathBuf::from(env_str("LS_MUSIC_DIR", "/srv/music")),
            artist_sep_sec: env_num::<i64>("LS_ARTIST_SEP_MIN", 45) * 60,
            title_sep_sec: env_num::<i64>("LS_TITLE_SEP_MIN", 180) * 60,
            track_sep_sec: env_num("LS_TRACK_SEP_SEC", 0),
            rescan_sec: env_num("LS_RESCAN_SEC", 86_400),
            lock_stale_sec: env_num("LS_LOCK_STALE_SEC", 3_600),
            top_n_dirs: env_num("LS_TOP_N_DIRS", 64),
            files_per_dir_try: env_num("LS_FILES_PER_DIR_TRY", 128),
            sample_n: env_num("LS_SAMPLE_N", 2_000),
            ffprobe_timeout: Duration::from_secs_f64(
                env_num("LS_FFPROBE_TIMEOUT_S", 0.8_f64).max(0.05),
            ),
            scan_exts: parse_exts(&env_str("LS_SCAN_EXTS", ".mp3,.flac,.m4a,.ogg,.wav,.aac")),
            unknown_artist_bucket: is_truthy(&env_str("LS_UNKNOWN_ARTIST_BUCKET", "1")),
            history_keep: env_num("LS_HISTORY_KEEP", 10_000),
            history_keep_paths: env_num("LS_HISTORY_KEEP_PATHS", 20_000),
        }
    }

    /// True when the path carries one of the configured audio extensions.
    pub fn is_audio_path(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_lowercase());
                self.scan_exts.iter().any(|e| *e == dotted)
            }
            None => false,
        }
    }

    /// Extension family recorded on the file row (`mp3`, `flac`, ...).
    pub fn ext_family(path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_num<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring malformed {}={:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "yes" | "on")
}

fn parse_exts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_exts(exts: &str) -> Config {
        Config {
            db_path: PathBuf::from("/tmp/test.db"),
            music_dir: PathBuf::from("/tmp/music"),
            artist_sep_sec: 45 * 60,
            title_sep_sec: 180 * 60,
            track_sep_sec: 0,
            rescan_sec: 86_400,
            lock_stale_sec: 3_600,
            top_n_dirs: 64,
            files_per_dir_try: 128,
            sample_n: 2_000,
            ffprobe_timeout: Duration::from_millis(800),
            scan_exts: parse_exts(exts),
            unknown_artist_bucket: true,
            history_keep: 10_000,
            history_keep_paths: 20_000,
        }
    }

    #[test]
    fn parse_exts_normalizes_dots_and_case() {
        assert_eq!(
            parse_exts("mp3, .FLAC , ogg"),
            vec![".mp3", ".flac", ".ogg"]
        );
        assert!(parse_exts("").is_empty());
    }

    #[test]
    fn audio_path_matching_is_case_insensitive() {
        let cfg = config_with_exts(".mp3,.flac");
        assert!(cfg.is_audio_path(Path::new("/m/a.mp3")));
        assert!(cfg.is_audio_path(Path::new("/m/b.FLAC")));
        assert!(!cfg.is_audio_path(Path::new("/m/c.txt")));
        assert!(!cfg.is_audio_path(Path::new("/m/noext")));
    }

    #[test]
    fn ext_family_lowercases() {
        assert_eq!(Config::ext_family(Path::new("/m/a.MP3")), "mp3");
        assert_eq!(Config::ext_family(Path::new("/m/noext")), "");
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
