//! SQLite corpus database utilities.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` to allow concurrent readers while writers append
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `synchronous = NORMAL`, which is durable under WAL

pub mod fts;
pub mod migrations;
mod read_pool;
pub mod schema;

pub use read_pool::ReadPool;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use std::{path::Path, time::Duration};

use crate::error::CorpusError;

/// Busy timeout used for corpus DB connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The write connection shared by the record store and the vector snapshot.
/// Each holder takes the mutex for a single statement or transaction; reads
/// on a file-backed corpus go through a [`ReadPool`] instead.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) the corpus SQLite database, apply runtime pragmas, and
/// migrate schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_corpus(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create corpus db directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open corpus database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply corpus migrations")?;

    Ok(conn)
}

/// Apply the pragmas a read-only connection needs to coexist with the writer.
pub(crate) fn configure_reader(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    conn.pragma_update(None, "query_only", true)?;
    Ok(())
}

/// Open a migrated in-memory corpus database, mostly for tests.
///
/// # Errors
///
/// Returns an error if migration fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory corpus database")?;
    migrations::migrate(&mut conn).context("apply corpus migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Take the shared connection, mapping poisoning into a corpus error.
///
/// # Errors
///
/// Returns [`CorpusError::LockPoisoned`] if a previous holder panicked.
pub fn lock_connection(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, CorpusError> {
    conn.lock()
        .map_err(|_| CorpusError::LockPoisoned("corpus connection"))
}

/// Pin the corpus embedding dimension on first use and verify it afterwards.
///
/// # Errors
///
/// Returns [`CorpusError::CorpusDimensionChanged`] if the database was
/// created with another dimension.
pub fn ensure_dimension(conn: &Connection, dimension: usize) -> Result<(), CorpusError> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT dimension FROM corpus_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let configured = i64::try_from(dimension).unwrap_or(i64::MAX);
    match stored {
        Some(existing) if existing != configured => Err(CorpusError::CorpusDimensionChanged {
            stored: usize::try_from(existing).unwrap_or(0),
            configured: dimension,
        }),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "UPDATE corpus_meta SET dimension = ?1 WHERE id = 1",
                [configured],
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, ensure_dimension, open_corpus, open_in_memory};
    use crate::db::migrations;
    use crate::error::CorpusError;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("litdb.sqlite3");
        (dir, path)
    }

    #[test]
    fn open_corpus_sets_wal_and_busy_timeout() {
        let (_dir, path) = temp_db_path();
        let conn = open_corpus(&path).expect("open corpus db");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(
            u128::from(busy_timeout_ms),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );
    }

    #[test]
    fn open_corpus_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let conn = open_corpus(&path).expect("open corpus db");
        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn dimension_is_pinned_on_first_use() {
        let conn = open_in_memory().expect("open");
        ensure_dimension(&conn, 4).expect("first pin");
        ensure_dimension(&conn, 4).expect("same dimension");

        let err = ensure_dimension(&conn, 8).expect_err("dimension change must fail");
        assert!(matches!(
            err,
            CorpusError::CorpusDimensionChanged {
                stored: 4,
                configured: 8
            }
        ));
    }
}
