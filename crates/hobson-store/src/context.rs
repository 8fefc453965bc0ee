//! Transactional accessor over named maps and named sets.
//!
//! A [`CollectionContext`] owns the single SQLite connection for a database
//! file. Every mutation made through the context, or through a
//! [`CollectionMap`] / [`CollectionSet`] handle obtained from it, runs inside
//! one pending write transaction. Reads in the same process see pending
//! mutations immediately; [`CollectionContext::commit`] makes all of them
//! durable at once, and nothing reaches disk before that.
//!
//! The pending transaction is opened at startup with `BEGIN IMMEDIATE`, so
//! the write lock is held from open to close. A second process opening the
//! same file fails fast with [`StoreError::Locked`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::migration;
use crate::value::Value;

/// Thread-safe handle to a collection database.
pub struct CollectionContext {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
    /// Serialises `atomically` and `serialized` blocks.
    txn: Mutex<()>,
}

impl fmt::Debug for CollectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionContext")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CollectionContext {
    /// Open (or create) a collection database at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(&StoreConfig::with_path(path.as_ref()))
    }

    /// Open (or create) the database described by `config`.
    ///
    /// Fails immediately, without retrying, if the file is corrupt or held
    /// by another process.
    pub fn open_with(config: &StoreConfig) -> StoreResult<Self> {
        let path = config.path.clone();
        info!(path = %path.display(), "opening collection database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path).map_err(|e| lock_conflict(e.into(), &path))?;
        Self::init(conn, config, Some(path.clone())).map_err(|e| lock_conflict(e, &path))
    }

    /// Create an in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory collection database");
        let conn = Connection::open_in_memory()?;
        Self::init(conn, &StoreConfig::default(), None)
    }

    fn init(conn: Connection, config: &StoreConfig, path: Option<PathBuf>) -> StoreResult<Self> {
        Self::apply_pragmas(&conn, config)?;
        migration::run_all(&conn)?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;

        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            txn: Mutex::new(()),
        })
    }

    fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
        // Fail instead of waiting on another process's lock.
        conn.busy_timeout(Duration::ZERO)?;

        // Must precede the switch to WAL so the WAL index lives in heap
        // memory and the file lock is never released.
        if config.exclusive {
            conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
        }
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_str())?;
        conn.pragma_update(None, "cache_size", -i64::from(config.cache_size_kib))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!(
            synchronous = config.synchronous.as_str(),
            exclusive = config.exclusive,
            "database pragmas applied"
        );
        Ok(())
    }

    /// Path of the backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|c| c.is_none()).unwrap_or(true)
    }

    /// Run `f` against the connection inside the pending transaction.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN IMMEDIATE;")?;
        }
        f(conn)
    }

    // ── handles ──────────────────────────────────────────────────────

    /// Return the live map bound to `name`, creating it empty if absent.
    pub fn get_map(&self, name: &str) -> StoreResult<CollectionMap<'_>> {
        self.with_conn(|conn| ensure_collection(conn, name, Kind::Map))?;
        Ok(CollectionMap {
            ctx: self,
            name: name.to_string(),
        })
    }

    /// Return the live set bound to `name`, creating it empty if absent.
    pub fn get_set(&self, name: &str) -> StoreResult<CollectionSet<'_>> {
        self.with_conn(|conn| ensure_collection(conn, name, Kind::Set))?;
        Ok(CollectionSet {
            ctx: self,
            name: name.to_string(),
        })
    }

    // ── maps ─────────────────────────────────────────────────────────

    /// `true` if a map named `name` exists.
    pub fn has_map(&self, name: &str) -> StoreResult<bool> {
        self.with_conn(|conn| Ok(kind_of(conn, name)? == Some(Kind::Map)))
    }

    /// Read a single map value without creating the map.
    pub fn get_map_value(&self, name: &str, key: &str) -> StoreResult<Option<Value>> {
        self.with_conn(|conn| map_get(conn, name, key))
    }

    /// Set a single map value, creating the map if absent.
    pub fn set_map_value(&self, name: &str, key: &str, value: Value) -> StoreResult<()> {
        self.with_conn(|conn| {
            ensure_collection(conn, name, Kind::Map)?;
            map_put(conn, name, key, &value)
        })
    }

    /// Replace the whole contents of the map `name`.
    pub fn set_map<I, K>(&self, name: &str, entries: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.with_conn(|conn| {
            ensure_collection(conn, name, Kind::Map)?;
            conn.execute(
                "DELETE FROM map_entries WHERE collection = ?1",
                rusqlite::params![name],
            )?;
            for (key, value) in entries {
                map_put(conn, name, key.as_ref(), &value)?;
            }
            Ok(())
        })
    }

    /// Snapshot of the map `name`, or `None` if it does not exist.
    pub fn read_map(&self, name: &str) -> StoreResult<Option<HashMap<String, Value>>> {
        self.with_conn(|conn| match kind_of(conn, name)? {
            Some(Kind::Map) => map_entries(conn, name).map(Some),
            Some(Kind::Set) => Err(kind_mismatch(name, Kind::Set, Kind::Map)),
            None => Ok(None),
        })
    }

    // ── sets ─────────────────────────────────────────────────────────

    /// `true` if a set named `name` exists.
    pub fn has_set(&self, name: &str) -> StoreResult<bool> {
        self.with_conn(|conn| Ok(kind_of(conn, name)? == Some(Kind::Set)))
    }

    /// `true` if `value` is a member of the set `name`. Never creates the set.
    pub fn has_set_value(&self, name: &str, value: &Value) -> StoreResult<bool> {
        self.with_conn(|conn| set_contains(conn, name, value))
    }

    /// Add one member to the set `name`, creating the set if absent.
    ///
    /// Returns `true` if the value was not already present.
    pub fn add_set_value(&self, name: &str, value: Value) -> StoreResult<bool> {
        self.with_conn(|conn| {
            ensure_collection(conn, name, Kind::Set)?;
            set_add(conn, name, &value)
        })
    }

    /// Remove one member from the set `name`. Returns `true` if it was present.
    pub fn remove_from_set(&self, name: &str, value: &Value) -> StoreResult<bool> {
        self.with_conn(|conn| set_remove(conn, name, value))
    }

    /// Replace the whole contents of the set `name`.
    pub fn set_set<I>(&self, name: &str, members: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = Value>,
    {
        self.with_conn(|conn| {
            ensure_collection(conn, name, Kind::Set)?;
            conn.execute(
                "DELETE FROM set_members WHERE collection = ?1",
                rusqlite::params![name],
            )?;
            for member in members {
                set_add(conn, name, &member)?;
            }
            Ok(())
        })
    }

    /// Snapshot of the set `name`, or `None` if it does not exist.
    pub fn read_set(&self, name: &str) -> StoreResult<Option<Vec<Value>>> {
        self.with_conn(|conn| match kind_of(conn, name)? {
            Some(Kind::Set) => set_members(conn, name).map(Some),
            Some(Kind::Map) => Err(kind_mismatch(name, Kind::Map, Kind::Set)),
            None => Ok(None),
        })
    }

    // ── namespaces ───────────────────────────────────────────────────

    /// Drop the map or set `name` with all its contents.
    ///
    /// Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM collections WHERE name = ?1",
                rusqlite::params![name],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Names of every map and set starting with `prefix`, sorted.
    pub fn names_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM collections \
                 WHERE substr(name, 1, length(?1)) = ?1 ORDER BY name",
            )?;
            let names = stmt
                .query_map(rusqlite::params![prefix], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    // ── transaction control ──────────────────────────────────────────

    /// Durably persist every pending mutation in one atomic step.
    #[instrument(skip(self))]
    pub fn commit(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("COMMIT;")?;
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            debug!("collection changes committed");
            Ok(())
        })
    }

    /// Discard every pending mutation.
    #[instrument(skip(self))]
    pub fn rollback(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("ROLLBACK;")?;
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            debug!("collection changes rolled back");
            Ok(())
        })
    }

    /// Run `f` and commit its mutations, or roll them all back if any step
    /// (or the commit itself) fails.
    ///
    /// Concurrent `atomically` blocks on the same context run one at a time.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> StoreResult<T>) -> StoreResult<T> {
        let _serial = self
            .txn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let result = f(self).and_then(|value| self.commit().map(|()| value));
        if let Err(err) = &result {
            if let Err(rollback_err) = self.rollback() {
                warn!(%err, %rollback_err, "rollback after failed write also failed");
            }
        }
        result
    }

    /// Run `f` with other writers held off, leaving its mutations pending.
    ///
    /// Unlike [`atomically`](Self::atomically) nothing is committed or rolled
    /// back; the caller's next commit or close decides.
    pub(crate) fn serialized<T>(&self, f: impl FnOnce(&Self) -> StoreResult<T>) -> StoreResult<T> {
        let _serial = self
            .txn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(self)
    }

    /// Commit pending changes, then reclaim free pages.
    #[instrument(skip(self))]
    pub fn compact(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("COMMIT;")?;
            conn.execute_batch("VACUUM;")?;
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            info!("collection database compacted");
            Ok(())
        })
    }

    /// Release the database. Uncommitted mutations are discarded.
    ///
    /// Calling `close` again is a no-op; every other operation fails with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };

        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK;")?;
        }
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;

        info!(path = ?self.path, "collection database closed");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Live handles
// ═══════════════════════════════════════════════════════════════════════

/// A live view of one named map. Reads and writes go straight to the
/// context's pending transaction.
#[derive(Debug, Clone)]
pub struct CollectionMap<'a> {
    ctx: &'a CollectionContext,
    name: String,
}

impl CollectionMap<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.ctx.with_conn(|conn| map_get(conn, &self.name, key))
    }

    pub fn insert(&self, key: &str, value: impl Into<Value>) -> StoreResult<()> {
        let value = value.into();
        self.ctx.with_conn(|conn| {
            ensure_collection(conn, &self.name, Kind::Map)?;
            map_put(conn, &self.name, key, &value)
        })
    }

    /// Returns `true` if the key was present.
    pub fn remove(&self, key: &str) -> StoreResult<bool> {
        self.ctx.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM map_entries WHERE collection = ?1 AND key = ?2",
                rusqlite::params![self.name, key],
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn contains_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.ctx.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM map_entries WHERE collection = ?1",
                rusqlite::params![self.name],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.ctx.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM map_entries WHERE collection = ?1 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(rusqlite::params![self.name], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> StoreResult<HashMap<String, Value>> {
        self.ctx.with_conn(|conn| map_entries(conn, &self.name))
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.ctx.with_conn(|conn| {
            conn.execute(
                "DELETE FROM map_entries WHERE collection = ?1",
                rusqlite::params![self.name],
            )?;
            Ok(())
        })
    }
}

/// A live view of one named set.
#[derive(Debug, Clone)]
pub struct CollectionSet<'a> {
    ctx: &'a CollectionContext,
    name: String,
}

impl CollectionSet<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the value was not already present.
    pub fn insert(&self, value: impl Into<Value>) -> StoreResult<bool> {
        let value = value.into();
        self.ctx.with_conn(|conn| {
            ensure_collection(conn, &self.name, Kind::Set)?;
            set_add(conn, &self.name, &value)
        })
    }

    /// Returns `true` if the value was present.
    pub fn remove(&self, value: &Value) -> StoreResult<bool> {
        self.ctx.with_conn(|conn| set_remove(conn, &self.name, value))
    }

    pub fn contains(&self, value: &Value) -> StoreResult<bool> {
        self.ctx.with_conn(|conn| set_contains(conn, &self.name, value))
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.ctx.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM set_members WHERE collection = ?1",
                rusqlite::params![self.name],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of every member, in unspecified order.
    pub fn members(&self) -> StoreResult<Vec<Value>> {
        self.ctx.with_conn(|conn| set_members(conn, &self.name))
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.ctx.with_conn(|conn| {
            conn.execute(
                "DELETE FROM set_members WHERE collection = ?1",
                rusqlite::params![self.name],
            )?;
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SQL helpers
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Map,
    Set,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Set => "set",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "map" => Some(Self::Map),
            "set" => Some(Self::Set),
            _ => None,
        }
    }
}

fn kind_mismatch(name: &str, actual: Kind, wanted: Kind) -> StoreError {
    StoreError::InvalidArgument(format!(
        "collection `{name}` is a {}, not a {}",
        actual.as_str(),
        wanted.as_str()
    ))
}

/// Map a busy/locked failure during open onto [`StoreError::Locked`].
fn lock_conflict(err: StoreError, path: &Path) -> StoreError {
    if let StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) = &err {
        if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return StoreError::Locked {
                path: path.to_path_buf(),
            };
        }
    }
    err
}

fn kind_of(conn: &Connection, name: &str) -> StoreResult<Option<Kind>> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM collections WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(kind.as_deref().and_then(Kind::parse))
}

fn ensure_collection(conn: &Connection, name: &str, kind: Kind) -> StoreResult<()> {
    match kind_of(conn, name)? {
        Some(existing) if existing == kind => Ok(()),
        Some(existing) => Err(kind_mismatch(name, existing, kind)),
        None => {
            conn.execute(
                "INSERT INTO collections (name, kind, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, kind.as_str(), chrono::Utc::now().timestamp()],
            )?;
            debug!(collection = name, kind = kind.as_str(), "collection created");
            Ok(())
        }
    }
}

fn map_get(conn: &Connection, name: &str, key: &str) -> StoreResult<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM map_entries WHERE collection = ?1 AND key = ?2",
            rusqlite::params![name, key],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| Value::from_json(&s))
        .transpose()
        .map_err(StoreError::from)
}

fn map_put(conn: &Connection, name: &str, key: &str, value: &Value) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO map_entries (collection, key, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value",
        rusqlite::params![name, key, value.to_json()?],
    )?;
    Ok(())
}

fn map_entries(conn: &Connection, name: &str) -> StoreResult<HashMap<String, Value>> {
    let mut stmt = conn.prepare("SELECT key, value FROM map_entries WHERE collection = ?1")?;
    let rows = stmt
        .query_map(rusqlite::params![name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(k, v)| -> StoreResult<(String, Value)> { Ok((k, Value::from_json(&v)?)) })
        .collect()
}

fn set_add(conn: &Connection, name: &str, value: &Value) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO set_members (collection, member) VALUES (?1, ?2)",
        rusqlite::params![name, value.to_json()?],
    )?;
    Ok(inserted > 0)
}

fn set_remove(conn: &Connection, name: &str, value: &Value) -> StoreResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM set_members WHERE collection = ?1 AND member = ?2",
        rusqlite::params![name, value.to_json()?],
    )?;
    Ok(deleted > 0)
}

fn set_contains(conn: &Connection, name: &str, value: &Value) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM set_members WHERE collection = ?1 AND member = ?2",
            rusqlite::params![name, value.to_json()?],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn set_members(conn: &Connection, name: &str) -> StoreResult<Vec<Value>> {
    let mut stmt = conn.prepare("SELECT member FROM set_members WHERE collection = ?1")?;
    let raw = stmt
        .query_map(rusqlite::params![name], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|s| Value::from_json(s).map_err(StoreError::from))
        .collect()
}

// ── tests ────────────────────────────────────────────────────────────
