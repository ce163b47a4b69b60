//! Durable snapshot of the vector index in the corpus database.
//!
//! One row per record id in `vector_entries`, stamped with the record
//! generation the vector came from. A row is replaced with a single
//! `INSERT ... ON CONFLICT DO UPDATE`, so a reader of the table never sees a
//! half-written entry. On startup the snapshot is loaded into a
//! [`VectorIndex`] and reconciled against the record store, which catches
//! entries made stale by out-of-band record edits.

use chrono::Utc;
use litdb_core::db::{SharedConnection, lock_connection};
use litdb_core::error::CorpusError;
use rusqlite::params;
use tracing::debug;

use super::VectorIndex;

/// Counts from loading the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Write-through persistence for vector index entries.
pub struct DurableVectors {
    conn: SharedConnection,
}

impl DurableVectors {
    #[must_use]
    pub const fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Persist (or replace) the entry for `id`.
    ///
    /// # Errors
    ///
    /// Storage or serialization errors.
    pub fn save(&self, id: &str, generation: u64, vector: &[f32]) -> Result<(), CorpusError> {
        let embedding_json = serde_json::to_string(vector)?;
        let generation = i64::try_from(generation).unwrap_or(i64::MAX);
        let dimension = i64::try_from(vector.len()).unwrap_or(i64::MAX);
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO vector_entries (record_id, generation, dimension, embedding_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(record_id) DO UPDATE SET
                 generation = excluded.generation,
                 dimension = excluded.dimension,
                 embedding_json = excluded.embedding_json,
                 updated_at = excluded.updated_at",
            params![id, generation, dimension, embedding_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete the entry for `id`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn delete(&self, id: &str) -> Result<bool, CorpusError> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn.execute("DELETE FROM vector_entries WHERE record_id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Identifiers present in the snapshot, ascending.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn ids(&self) -> Result<Vec<String>, CorpusError> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare("SELECT record_id FROM vector_entries ORDER BY record_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Load every well-formed row into `index`.
    ///
    /// Rows with malformed JSON, the wrong dimension, or non-finite values
    /// are skipped; reconciliation rebuilds them from the record store.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn load_into(&self, index: &VectorIndex) -> Result<LoadReport, CorpusError> {
        let rows = {
            let conn = lock_connection(&self.conn)?;
            let mut stmt = conn.prepare(
                "SELECT record_id, generation, embedding_json FROM vector_entries ORDER BY record_id",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            rows
        };

        let mut report = LoadReport::default();
        for (id, generation, embedding_json) in rows {
            let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(value) => value,
                Err(err) => {
                    debug!("skipping malformed vector snapshot row for {}: {}", id, err);
                    report.skipped += 1;
                    continue;
                }
            };
            let generation = u64::try_from(generation).unwrap_or(0);
            match index.upsert(&id, &embedding, generation) {
                Ok(_) => report.loaded += 1,
                Err(err) => {
                    debug!("skipping vector snapshot row for {}: {}", id, err);
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }
}
