//! SQLite store: library cache, play history, metadata.

pub mod files;
pub mod init;
pub mod meta;
pub mod plays;

pub use init::{open, vacuum};
