//! Schema setup for the collection database.
//!
//! Schema versions are static SQL strings keyed by version number. The
//! applied version is tracked in a `_migrations` table so each version
//! runs exactly once per file.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All schema versions in order. Append only.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "named collections: maps and sets of JSON scalars",
    sql: r#"
            CREATE TABLE collections (
                name       TEXT PRIMARY KEY,
                kind       TEXT NOT NULL CHECK(kind IN ('map','set')),
                created_at INTEGER NOT NULL
            );

            CREATE TABLE map_entries (
                collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            ) WITHOUT ROWID;

            CREATE TABLE set_members (
                collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                member     TEXT NOT NULL,
                PRIMARY KEY (collection, member)
            ) WITHOUT ROWID;
        "#,
}];

/// Run all pending migrations against `conn`.
///
/// Must be called outside of an open transaction.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "collection schema is up to date");
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "collection schema ready"
    );
    Ok(())
}

/// Return the latest applied version, or 0 on a fresh file.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    conn.execute_batch("BEGIN IMMEDIATE;")?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => conn.execute_batch("COMMIT;")?,
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn run_all_twice_is_noop() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn kind_is_constrained() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO collections (name, kind, created_at) VALUES ('x', 'list', 0)",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn entries_cascade_with_collection() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO collections (name, kind, created_at) VALUES ('m', 'map', 0);
             INSERT INTO map_entries (collection, key, value) VALUES ('m', 'foo', '\"bar\"');
             DELETE FROM collections WHERE name = 'm';",
        )
        .unwrap();

        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM map_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }
}
