//! Store configuration.
//!
//! Read from the `[store]` table of a TOML file. Every field has a
//! default, so a missing file or a missing table yields
//! [`StoreConfig::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// SQLite `synchronous` level applied at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync on every commit.
    #[default]
    Full,
    /// fsync at WAL checkpoints only; the last commit may be lost on power failure.
    Normal,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Settings for opening a [`CollectionContext`](crate::CollectionContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Durability of each commit.
    pub synchronous: SyncMode,
    /// Page cache size in KiB.
    pub cache_size_kib: u32,
    /// Hold the database file exclusively for the lifetime of the context.
    pub exclusive: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/hobson.db"),
            synchronous: SyncMode::Full,
            cache_size_kib: 8_000,
            exclusive: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    store: StoreConfig,
}

impl StoreConfig {
    /// Config for the given database path with default settings.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document containing an optional `[store]` table.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.store)
    }

    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            StoreError::Config(msg) => StoreError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
