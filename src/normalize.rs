//! Tag-string normalization.
//!
//! Separation windows are keyed on normalized artist and title strings:
//! NFKD-decomposed, lowercased, trimmed, leading English articles stripped,
//! internal whitespace collapsed. Article stripping loops until no article
//! matches, which makes the whole function idempotent.

use unicode_normalization::UnicodeNormalization;

/// Shared separation bucket for files with no usable artist tag.
pub const UNKNOWN_ARTIST: &str = "__unknown__";

/// Stripped-article list fixed to the English set.
const ARTICLES: [&str; 3] = ["the ", "a ", "an "];

pub fn normalize_key(raw: &str) -> String {
    let lowered = raw.nfkd().collect::<String>().to_lowercase();
    let mut s = lowered.trim();
    loop {
        let mut stripped = false;
        for article in ARTICLES {
            if let Some(rest) = s.strip_prefix(article) {
                s = rest.trim_start();
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Artist separation key. An empty artist lands in the shared unknown
/// bucket when enabled, otherwise carries no artist constraint at all.
pub fn artist_key(raw: &str, bucket_unknown: bool) -> Option<String> {
    let key = normalize_key(raw);
    if !key.is_empty() {
        Some(key)
    } else if bucket_unknown {
        Some(UNKNOWN_ARTIST.to_string())
    } else {
        None
    }
}

/// Title separation key, or `None` when the title normalizes to nothing.
pub fn title_key(raw: &str) -> Option<String> {
    let key = normalize_key(raw);
    (!key.is_empty()).then_some(key)
}
