//! Tag extraction via an external ffprobe process.
//!
//! The probe runs with stdin closed, stdout captured, stderr discarded, and
//! a hard wall-clock bound. On Unix the child gets its own process group so
//! a timeout can terminate descendants too: SIGTERM, a 100 ms grace, then
//! SIGKILL. Any failure (missing binary, timeout, non-zero exit, garbage
//! output) yields empty tags — the probe never fails a scan or a pick.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::debug;

/// Raw tag strings as reported by the probe; empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub artist: String,
    pub title: String,
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    tags: Option<HashMap<String, String>>,
}

/// Artist tag preference order, matched against lowercased key names.
const ARTIST_KEYS: [&str; 5] = [
    "artist",
    "albumartist",
    "album_artist",
    "album artist",
    "performer",
];

/// Probe one file for artist/title tags.
///
/// Falls back to the filename when the probe comes up empty: the stem fills
/// a missing title, and an `Artist - Title` stem fills a missing artist.
pub async fn probe_tags(path: &Path, limit: Duration) -> Tags {
    let mut tags = match run_ffprobe(path, limit).await {
        Ok(tags) => tags,
        Err(reason) => {
            debug!(path = %path.display(), %reason, "ffprobe failed, using filename fallback");
            Tags::default()
        }
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .trim();
    if tags.title.is_empty() {
        tags.title = stem.to_string();
    }
    if tags.artist.is_empty() {
        if let Some((artist, _)) = stem.split_once(" - ") {
            tags.artist = artist.trim().to_string();
        }
    }
    tags
}

async fn run_ffprobe(path: &Path, limit: Duration) -> Result<Tags, String> {
    let mut cmd = std::process::Command::new("ffprobe");
    cmd.arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format_tags=artist,title,album_artist,albumartist,performer,AlbumArtist,ALBUMARTIST,ARTIST,TITLE,PERFORMER")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = tokio::process::Command::from(cmd)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("spawn failed: {e}"))?;

    let run = async {
        let mut stdout = Vec::new();
        if let Some(mut pipe) = child.stdout.take() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        let status = child.wait().await;
        (status, stdout)
    };
    let outcome = timeout(limit, run).await;

    let (status, stdout) = match outcome {
        Ok(done) => done,
        Err(_) => {
            terminate(&mut child).await;
            return Err(format!("timed out after {limit:?}"));
        }
    };

    match status {
        Ok(s) if s.success() => parse_tags(&stdout),
        Ok(s) => Err(format!("exit status {s}")),
        Err(e) => Err(format!("wait failed: {e}")),
    }
}

/// SIGTERM the child's process group, grant 100 ms, then SIGKILL.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
        tokio::time::sleep(Duration::from_millis(100)).await;
        unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn parse_tags(stdout: &[u8]) -> Result<Tags, String> {
    let text = std::str::from_utf8(stdout).map_err(|e| format!("stdout not UTF-8: {e}"))?;
    let parsed: ProbeOutput =
        serde_json::from_str(text.trim()).map_err(|e| format!("bad JSON: {e}"))?;

    let mut by_key: HashMap<String, String> = HashMap::new();
    if let Some(tags) = parsed.format.and_then(|f| f.tags) {
        for (key, value) in tags {
            by_key.insert(key.to_lowercase(), value.trim().to_string());
        }
    }

    let artist = ARTIST_KEYS
        .iter()
        .find_map(|k| by_key.get(*k).filter(|v| !v.is_empty()))
        .cloned()
        .unwrap_or_default();
    let title = by_key.get("title").cloned().unwrap_or_default();
    Ok(Tags { artist, title })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_tags() {
        let json = br#"{"format":{"tags":{"ARTIST":"The Beatles","title":" Help! "}}}"#;
        let tags = parse_tags(json).unwrap();
        assert_eq!(tags.artist, "The Beatles");
        assert_eq!(tags.title, "Help!");
    }

    #[test]
    fn artist_preference_order() {
        let json = br#"{"format":{"tags":{"performer":"P","album_artist":"AA","artist":"A"}}}"#;
        assert_eq!(parse_tags(json).unwrap().artist, "A");

        let json = br#"{"format":{"tags":{"performer":"P","albumartist":"AA"}}}"#;
        assert_eq!(parse_tags(json).unwrap().artist, "AA");
    }

    #[test]
    fn missing_tags_section_is_empty() {
        assert_eq!(parse_tags(br#"{"format":{}}"#).unwrap(), Tags::default());
        assert_eq!(parse_tags(br#"{}"#).unwrap(), Tags::default());
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(parse_tags(b"not json").is_err());
        assert!(parse_tags(&[0xff, 0xfe]).is_err());
    }

    #[tokio::test]
    async fn unreadable_file_falls_back_to_stem() {
        // Whether ffprobe is installed (non-zero exit) or missing (spawn
        // failure), the stem fallback must kick in.
        let tags = probe_tags(
            Path::new("/nonexistent/Some Artist - Some Song.mp3"),
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(tags.artist, "Some Artist");
        assert_eq!(tags.title, "Some Artist - Some Song");
    }
}
