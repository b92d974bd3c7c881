//! # ls-radio
//!
//! SQLite-backed track picker and play history for a Liquidsoap host:
//! - Library cache and play-separation state in a single store file
//! - Incremental background rescans of the music root
//! - Two-pass randomized selection (strict separation, then least-violating)
//! - External ffprobe tag extraction with a hard wall-clock bound

pub mod config;
pub mod db;
pub mod error;
pub mod normalize;
pub mod picker;
pub mod probe;
pub mod scanner;

pub use error::{Error, Result};

/// Current unix time in whole seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
