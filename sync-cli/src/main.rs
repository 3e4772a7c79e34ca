//! # pairsync
//!
//! CLI tool for pairsync folder synchronization.
//!
//! ## Commands
//!
//! - `init`: Write a starter configuration file
//! - `scan`: Catalog a folder
//! - `diff`: Preview what a sync would transfer
//! - `sync`: Sync two local folders through a full protocol session
//!
//! ## Example
//!
//! ```bash
//! # Write ~/.config/pairsync/pairsync.toml
//! pairsync init
//!
//! # See what would change
//! pairsync diff ~/Photos /media/backup/Photos
//!
//! # Mirror changes both ways, with debug logging
//! pairsync -v sync --two-way ~/Photos /media/backup/Photos
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use sync_types::Resolution;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{diff, init, scan, sync};

/// CLI tool for pairsync folder synchronization.
#[derive(Parser, Debug)]
#[command(name = "pairsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: the platform config directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Catalog a folder
    Scan {
        /// Folder to scan
        folder: PathBuf,

        /// Skip content hashing
        #[arg(long)]
        no_hash: bool,

        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview what a sync would transfer
    Diff {
        /// Source folder
        source: PathBuf,

        /// Target folder
        target: PathBuf,

        /// Preview a two-way sync
        #[arg(long)]
        two_way: bool,

        /// Print the preview as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync two local folders
    Sync {
        /// Source folder
        source: PathBuf,

        /// Target folder (created if missing)
        target: PathBuf,

        /// Copy changes in both directions
        #[arg(long)]
        two_way: bool,

        /// How to settle files changed on both sides
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        /// Delete target files the source no longer has (one-way only)
        #[arg(long)]
        mirror_deletions: bool,
    },
}

/// Conflict strategies selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    KeepSource,
    KeepTarget,
    KeepNewest,
}

impl From<Strategy> for Resolution {
    fn from(strategy: Strategy) -> Self {
        // The source side initiates, so its version is "local".
        match strategy {
            Strategy::KeepSource => Resolution::KeepLocal,
            Strategy::KeepTarget => Resolution::KeepRemote,
            Strategy::KeepNewest => Resolution::KeepNewest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => config::default_path()?,
            };
            init::run(&path, force).await?;
        }
        Commands::Scan {
            folder,
            no_hash,
            json,
        } => {
            let config = config::load(cli.config.as_deref())?;
            scan::run(&folder, config.sync.hash_contents && !no_hash, json).await?;
        }
        Commands::Diff {
            source,
            target,
            two_way,
            json,
        } => {
            let config = config::load(cli.config.as_deref())?;
            let two_way = two_way || config.sync.two_way;
            diff::run(&source, &target, two_way, config.sync.hash_contents, json).await?;
        }
        Commands::Sync {
            source,
            target,
            two_way,
            strategy,
            mirror_deletions,
        } => {
            let mut config = config::load(cli.config.as_deref())?;
            if let Some(strategy) = strategy {
                config = config.with_conflict_strategy(strategy.into());
            }
            if mirror_deletions {
                config = config.with_mirror_deletions(true);
            }
            let two_way = two_way || config.sync.two_way;
            sync::run(config, &source, &target, two_way).await?;
        }
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::parse_from([
            "pairsync",
            "-vv",
            "sync",
            "--two-way",
            "--strategy",
            "keep-target",
            "a",
            "b",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Sync {
                two_way, strategy, ..
            } => {
                assert!(two_way);
                assert_eq!(
                    strategy.map(Resolution::from),
                    Some(Resolution::KeepRemote)
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
