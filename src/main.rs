//! # Corpus Sync CLI (`csync`)
//!
//! ## Usage
//!
//! ```bash
//! csync --config ./config/csync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csync sync` | Run one synchronization pass |
//! | `csync status` | Show cache, corpus and last-pass summary |
//!
//! The process exits non-zero when a pass does not succeed, so schedulers
//! can alert on it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corpus_sync::config;
use corpus_sync::logging;
use corpus_sync::progress::ProgressMode;
use corpus_sync::report;
use corpus_sync::sync::{self, SyncOptions};

/// Corpus Sync: keep a local markdown corpus in sync with a hosted vector store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/csync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "csync",
    about = "Incrementally sync a local markdown corpus into a hosted vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/csync.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass.
    ///
    /// Scans the corpus, uploads added and changed documents, retires the
    /// remote copies they replace, waits for ingestion, and commits the
    /// cache. Writes an execution report unless `--no-report` is given.
    Sync {
        /// Re-upload every document with usable timestamps.
        #[arg(long)]
        full: bool,

        /// Show the planned decisions without touching the remote store or cache.
        #[arg(long)]
        dry_run: bool,

        /// Retire remote copies of documents deleted from the corpus.
        #[arg(long)]
        prune: bool,

        /// Vector store id (overrides config and `VECTOR_STORE_ID`).
        #[arg(long)]
        vector_store: Option<String>,

        /// Skip writing the JSON execution report.
        #[arg(long)]
        no_report: bool,
    },

    /// Show corpus, cache and last-pass summary.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("warning: could not initialize logging: {}", e);
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Sync {
            full,
            dry_run,
            prune,
            vector_store,
            no_report,
        } => {
            let options = SyncOptions {
                full,
                prune,
                vector_store_override: vector_store,
            };
            sync::run_sync(&cfg, options, dry_run, !no_report, progress).await?;
        }
        Commands::Status => {
            report::run_status(&cfg)?;
        }
    }

    Ok(())
}
