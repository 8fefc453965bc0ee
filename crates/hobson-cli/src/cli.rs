//! CLI argument definitions for `hobson-db`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and maintain a Hobson store file.
#[derive(Parser)]
#[command(
    name = "hobson-db",
    version,
    about = "Inspect and maintain a Hobson store file",
    long_about = "Operator tool for a Hobson hub's store file. The hub must be stopped \
                  first: the file is held exclusively by whichever process opens it."
)]
pub struct Cli {
    /// Store configuration file (TOML, `[store]` table).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Database file. Overrides the path from `--config`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List collection names.
    Collections {
        /// Only names starting with this prefix.
        #[arg(long, short, default_value = "")]
        prefix: String,
    },

    /// Print one collection as JSON.
    Show {
        /// Collection name.
        name: String,
    },

    /// Print every action set of a hub as JSON.
    ActionSets {
        /// Hub id.
        #[arg(long, default_value = "local")]
        hub: String,
    },

    /// Delete an action set by id, from whichever hub owns it.
    DeleteActionSet {
        /// Action-set id.
        id: String,
    },

    /// Reclaim free space in the store file.
    Compact,
}
