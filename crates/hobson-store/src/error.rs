//! Error types for the hobson-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Nothing in this crate retries: storage failures are surfaced to the
//! immediate caller as-is.

use std::path::PathBuf;

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- Storage errors -----------------------------------------------------
    /// SQLite operation failed (open, read, write or commit).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The database file is held open by another process.
    #[error("database is locked by another process: {}", path.display())]
    Locked { path: PathBuf },

    /// The context was closed; no further operations are valid.
    #[error("collection context is closed")]
    Closed,

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// An internal lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    // -- Data errors --------------------------------------------------------
    /// JSON serialization or deserialization of a stored value failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Stored entity data is malformed or cannot be resolved.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported by this store.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Store configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// `true` for failures of the underlying storage medium.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_)
                | Self::Io(_)
                | Self::Locked { .. }
                | Self::Closed
                | Self::Migration { .. }
                | Self::Poisoned(_)
        )
    }

    /// `true` if the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

// ── tests ────────────────────────────────────────────────────────────
