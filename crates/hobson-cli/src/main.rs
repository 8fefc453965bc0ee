//! CLI entry point for the Hobson store.
//!
//! This binary provides the `hobson-db` command for listing, dumping and
//! compacting a hub's store file while the hub is stopped.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use hobson_store::StoreConfig;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("warn", cli.log_json);

    let config = resolve_config(&cli)?;
    let output = match &cli.command {
        Commands::Collections { prefix } => commands::collections(&config, prefix)?,
        Commands::Show { name } => commands::show(&config, name)?,
        Commands::ActionSets { hub } => commands::action_sets(&config, hub)?,
        Commands::DeleteActionSet { id } => commands::delete_action_set(&config, id)?,
        Commands::Compact => commands::compact(&config)?,
    };

    print!("{output}");
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `--config` file (or defaults), then `--db` on top.
fn resolve_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.path = db.clone();
    }
    Ok(config)
}

/// Initialize the tracing subscriber with the given default level.
///
/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
