//! Common error types for ls-radio.

use thiserror::Error;

/// Common result type for ls-radio operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scan lock held by pid {0}")]
    ScanLockHeld(u32),
}

impl Error {
    /// Transient lock contention (SQLITE_BUSY family). Callers on the pick
    /// path skip the optional write instead of failing the pick.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
