//! Lexical scorer adapter.
//!
//! The engine consumes lexical relevance through [`LexicalScorer`]; it does
//! not implement a full-text engine itself. [`Fts5Scorer`] adapts the BM25
//! search of the SQLite record store.

use anyhow::{Context, Result};
use litdb_core::store::SqliteRecordStore;
use serde::Serialize;
use std::sync::Arc;

/// One lexical result. Higher `score` means more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub id: String,
    pub score: f32,
}

/// External lexical search capability.
///
/// Implementations return at most `k` hits ordered best first. They are
/// called from a worker thread and must apply their own timeouts rather than
/// hang; an `Err` degrades the search instead of failing it.
pub trait LexicalScorer: Send + Sync {
    /// # Errors
    ///
    /// Any failure of the underlying search backend.
    fn score(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>>;
}

/// BM25 scorer over the FTS5 mirror of a [`SqliteRecordStore`].
///
/// SQLite reports BM25 as a negative number where lower is better; the sign
/// is flipped so that higher is better, as the fusion step expects.
pub struct Fts5Scorer {
    store: Arc<SqliteRecordStore>,
}

impl Fts5Scorer {
    #[must_use]
    pub const fn new(store: Arc<SqliteRecordStore>) -> Self {
        Self { store }
    }
}

impl LexicalScorer for Fts5Scorer {
    fn score(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let limit = u32::try_from(k).unwrap_or(u32::MAX);
        let hits = self
            .store
            .search_bm25(query, limit)
            .context("lexical search failed")?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                #[allow(clippy::cast_possible_truncation)]
                let score = (-hit.rank) as f32;
                LexicalHit {
                    id: hit.record_id,
                    score,
                }
            })
            .collect())
    }
}
