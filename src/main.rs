//! ls-radio — SQLite-backed track picker and play history for Liquidsoap.
//!
//! One executable, five subcommands. `pick-next` prints a single line on
//! stdout (the chosen path, or empty for silence) and always exits zero;
//! every diagnostic goes to stderr.

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ls_radio::config::Config;
use ls_radio::db::plays::RetentionCaps;
use ls_radio::db::{self, plays};
use ls_radio::{normalize, picker, scanner};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store and apply migrations.
    Init,
    /// Run a full library scan in the foreground.
    RebuildCache,
    /// Print the next track's path (or an empty line) on stdout.
    PickNext,
    /// Record the on-air start of a track.
    TrackStart {
        /// Raw artist string from the stream metadata.
        #[arg(long, default_value = "")]
        artist: String,
        /// Raw title string from the stream metadata.
        #[arg(long, default_value = "")]
        title: String,
        /// Absolute path of the file on air.
        #[arg(long, default_value = "")]
        path: String,
    },
    /// Compact the store file.
    Vacuum,
    /// Detached background rescan entry point.
    #[command(hide = true)]
    InternalRescan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ls_radio=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "ls-radio v{} starting, command {:?}",
        env!("CARGO_PKG_VERSION"),
        cli.command
    );

    let cfg = Config::from_env();

    match cli.command {
        Command::Init => {
            db::open(&cfg.db_path).await?;
            info!("store ready at {}", cfg.db_path.display());
        }
        Command::RebuildCache => {
            let pool = db::open(&cfg.db_path).await?;
            scanner::run_scan(&pool, &cfg).await?;
        }
        Command::PickNext => {
            let path = picker::pick_next(&cfg).await;
            println!("{path}");
        }
        Command::TrackStart { artist, title, path } => {
            track_start(&cfg, &artist, &title, &path).await;
        }
        Command::Vacuum => {
            let pool = db::open(&cfg.db_path).await?;
            db::vacuum(&pool).await?;
            info!("store compacted");
        }
        Command::InternalRescan => {
            internal_rescan(&cfg).await;
        }
    }

    Ok(())
}

/// On-air callback: overwrite the provisional play records with the live
/// timestamp and log the history row. Exits quietly on any store trouble;
/// the stream must keep running.
async fn track_start(cfg: &Config, artist: &str, title: &str, path: &str) {
    if path.is_empty() {
        return;
    }
    let pool = match db::open(&cfg.db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("store unavailable, dropping track-start: {e}");
            return;
        }
    };

    let artist_norm = normalize::artist_key(artist, cfg.unknown_artist_bucket);
    let title_norm = normalize::title_key(title);
    let caps = RetentionCaps {
        history_keep: cfg.history_keep,
        history_keep_paths: cfg.history_keep_paths,
    };
    if let Err(e) = plays::record_play(
        &pool,
        path,
        artist,
        title,
        artist_norm.as_deref(),
        title_norm.as_deref(),
        ls_radio::now_ts(),
        caps,
    )
    .await
    {
        warn!("dropping track-start record: {e}");
    }
}

/// Child entry for the detached rescan. A held lock means another scanner
/// got there first; that is not an error.
async fn internal_rescan(cfg: &Config) {
    let pool = match db::open(&cfg.db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("store unavailable, skipping rescan: {e}");
            return;
        }
    };
    match scanner::run_scan(&pool, cfg).await {
        Ok(_) => {}
        Err(ls_radio::Error::ScanLockHeld(pid)) => {
            tracing::debug!(pid, "rescan already running elsewhere");
        }
        Err(e) => warn!("background rescan failed: {e}"),
    }
}
