use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{PutMode, PutOutcome, RecordStore, plan_put};
use crate::db::fts::{
    LexicalMatch, fts_in_sync, fts_table_exists, rebuild_fts_index, search_bm25,
};
use crate::db::{self, ReadPool, SharedConnection, lock_connection};
use crate::error::CorpusError;
use crate::model::{Record, StoredRecord};

/// Durable record store in the corpus SQLite database.
///
/// Each `put`/`remove` runs in one transaction, which also carries the FTS5
/// trigger updates, so the lexical index never disagrees with the record
/// table. A file-backed store serves reads from a [`ReadPool`], so lookups
/// and lexical search do not queue behind an open write transaction.
pub struct SqliteRecordStore {
    conn: SharedConnection,
    readers: Option<ReadPool>,
    dimension: usize,
}

/// Read connections opened for a file-backed store by [`SqliteRecordStore::open`].
pub const DEFAULT_READ_CONNECTIONS: usize = 4;

impl SqliteRecordStore {
    /// Open (or create) a corpus database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, or was
    /// created with a different embedding dimension.
    pub fn open(path: &Path, dimension: usize) -> anyhow::Result<Self> {
        Self::open_with_readers(path, dimension, DEFAULT_READ_CONNECTIONS)
    }

    /// Open a corpus database file with `readers` read-only connections.
    /// With `readers == 0` every read goes through the write connection.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open`], plus failures opening the read connections.
    pub fn open_with_readers(
        path: &Path,
        dimension: usize,
        readers: usize,
    ) -> anyhow::Result<Self> {
        let conn = db::open_corpus(path)?;
        let mut store = Self::from_connection(conn, dimension)
            .with_context(|| format!("open record store {}", path.display()))?;
        if readers > 0 {
            store.readers = Some(ReadPool::open(path, readers)?);
        }
        Ok(store)
    }

    /// Open a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn in_memory(dimension: usize) -> anyhow::Result<Self> {
        let conn = db::open_in_memory()?;
        Ok(Self::from_connection(conn, dimension)?)
    }

    /// Wrap an already migrated connection.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::CorpusDimensionChanged`] on a dimension clash.
    pub fn from_connection(conn: Connection, dimension: usize) -> Result<Self, CorpusError> {
        db::ensure_dimension(&conn, dimension)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            readers: None,
            dimension,
        })
    }

    /// Handle to the underlying connection for components sharing the file.
    #[must_use]
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }

    /// BM25 search over the records mirrored into FTS5.
    ///
    /// # Errors
    ///
    /// Returns an error if the FTS query fails.
    pub fn search_bm25(&self, query: &str, limit: u32) -> anyhow::Result<Vec<LexicalMatch>> {
        let conn = self.reader()?;
        search_bm25(&conn, query, limit)
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, CorpusError> {
        match &self.readers {
            Some(pool) => pool.acquire(),
            None => lock_connection(&self.conn),
        }
    }
}

fn read_stored(row: &Row<'_>) -> rusqlite::Result<(StoredRecord, String, String)> {
    let record = Record {
        id: row.get(0)?,
        title: row.get(1)?,
        year: row.get(2)?,
        authors: Vec::new(),
        text: row.get(4)?,
        embedding: Vec::new(),
    };
    let generation: i64 = row.get(7)?;
    Ok((
        StoredRecord {
            record,
            generation: u64::try_from(generation).unwrap_or(0),
            content_hash: row.get(6)?,
        },
        row.get(3)?,
        row.get(5)?,
    ))
}

impl RecordStore for SqliteRecordStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn put(&self, record: Record, mode: PutMode) -> Result<PutOutcome, CorpusError> {
        record.validate_embedding(self.dimension)?;
        let content_hash = record.content_hash();
        let authors_json = serde_json::to_string(&record.authors)?;
        let embedding_json = serde_json::to_string(&record.embedding)?;
        let search_authors = record.authors.join(" ");
        let now = Utc::now().to_rfc3339();

        let mut conn = lock_connection(&self.conn)?;
        let tx = conn.transaction()?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT content_hash, generation FROM records WHERE record_id = ?1",
                params![record.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = plan_put(
            &record.id,
            existing
                .as_ref()
                .map(|(hash, generation)| (hash.as_str(), u64::try_from(*generation).unwrap_or(0))),
            &content_hash,
            mode,
        )?;
        let generation = i64::try_from(outcome.generation()).unwrap_or(i64::MAX);

        match outcome {
            PutOutcome::Unchanged { .. } => {
                debug!(id = %record.id, "record unchanged; skipping write");
                return Ok(outcome);
            }
            PutOutcome::Inserted { .. } => {
                tx.execute(
                    "INSERT INTO records (record_id, title, year, authors_json, search_authors,
                                          body, embedding_json, content_hash, generation,
                                          created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        record.id,
                        record.title,
                        record.year,
                        authors_json,
                        search_authors,
                        record.text,
                        embedding_json,
                        content_hash,
                        generation,
                        now,
                    ],
                )?;
            }
            PutOutcome::Updated { .. } => {
                tx.execute(
                    "UPDATE records
                     SET title = ?2, year = ?3, authors_json = ?4, search_authors = ?5,
                         body = ?6, embedding_json = ?7, content_hash = ?8, generation = ?9,
                         updated_at = ?10
                     WHERE record_id = ?1",
                    params![
                        record.id,
                        record.title,
                        record.year,
                        authors_json,
                        search_authors,
                        record.text,
                        embedding_json,
                        content_hash,
                        generation,
                        now,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, id: &str) -> Result<StoredRecord, CorpusError> {
        let conn = self.reader()?;
        let row = conn
            .query_row(
                "SELECT record_id, title, year, authors_json, body, embedding_json,
                        content_hash, generation
                 FROM records WHERE record_id = ?1",
                params![id],
                read_stored,
            )
            .optional()?;
        drop(conn);

        let Some((mut stored, authors_json, embedding_json)) = row else {
            return Err(CorpusError::NotFound(id.to_owned()));
        };
        stored.record.authors = serde_json::from_str(&authors_json)?;
        stored.record.embedding = serde_json::from_str(&embedding_json)?;
        Ok(stored)
    }

    fn remove(&self, id: &str) -> Result<bool, CorpusError> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn.execute("DELETE FROM records WHERE record_id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn contains(&self, id: &str) -> Result<bool, CorpusError> {
        let conn = self.reader()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE record_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn ids(&self) -> Result<Vec<String>, CorpusError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT record_id FROM records ORDER BY record_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn len(&self) -> Result<usize, CorpusError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn repair_lexical_index(&self) -> Result<bool, CorpusError> {
        let conn = lock_connection(&self.conn)?;
        let exists = fts_table_exists(&conn)?;
        if !exists {
            return Err(CorpusError::LexicalIndexMissing);
        }
        if fts_in_sync(&conn)? {
            return Ok(false);
        }
        warn!("lexical index out of sync with records; rebuilding");
        rebuild_fts_index(&conn)?;
        Ok(true)
    }
}
