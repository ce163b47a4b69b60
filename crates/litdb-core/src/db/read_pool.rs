//! Round-robin pool of read-only connections.
//!
//! Under WAL a reader sees the last committed snapshot and never waits for
//! the writer, so lookups and lexical search stay responsive while a write
//! transaction for another record is open.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::configure_reader;
use crate::error::CorpusError;

const MAX_POOL_SIZE: usize = 16;

pub struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    /// Open `size` read-only connections (clamped to `1..=16`) to an existing
    /// corpus file.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be opened or configured.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let size = size.clamp(1, MAX_POOL_SIZE);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("open read connection {}", path.display()))?;
            configure_reader(&conn).context("configure read connection")?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    /// Take the next connection in turn.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::LockPoisoned`] if a previous holder panicked.
    pub fn acquire(&self) -> Result<MutexGuard<'_, Connection>, CorpusError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx]
            .lock()
            .map_err(|_| CorpusError::LockPoisoned("corpus read connection"))
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ReadPool;
    use crate::db::open_corpus;

    #[test]
    fn readers_see_committed_rows_and_refuse_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corpus.sqlite3");
        let writer = open_corpus(&path).expect("open writer");
        writer
            .execute(
                "INSERT INTO records (record_id, title, body, embedding_json, content_hash,
                                      generation, created_at, updated_at)
                 VALUES ('a', 'Zeolites', '', '[]', 'h', 1, 't', 't')",
                [],
            )
            .expect("insert");

        let pool = ReadPool::open(&path, 0).expect("open pool");
        assert_eq!(pool.size(), 1);
        let reader = pool.acquire().expect("acquire");
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
        assert!(reader.execute("DELETE FROM records", []).is_err());
    }
}
