//! FTS5 full-text search with BM25 ranking.
//!
//! This module provides search helpers on top of the `records_fts` FTS5
//! virtual table defined in [`super::schema`]. The FTS5 table is kept in sync
//! with the `records` table via INSERT/UPDATE/DELETE triggers, so lexical
//! results change in the same transaction as the record write.
//!
//! # Column Weights (BM25)
//!
//! | Column  | Weight | Rationale                                  |
//! |---------|--------|--------------------------------------------|
//! | title   | 3.0    | Short, specific, highest signal            |
//! | authors | 1.0    | Names help disambiguate, low cardinality   |
//! | body    | 2.0    | Abstract or full text, moderate signal     |
//! | year    | 1.0    | Lets "catalysis 2015" favour 2015 records  |
//!
//! # Query compilation
//!
//! User and catalog text is never handed to FTS5 verbatim. FTS5 has its own
//! query language (`AND`, `NEAR`, column filters, `*`), so
//! [`build_match_expression`] keeps only alphanumeric terms, quotes each as a
//! string literal and ORs them together. Operators in the input become plain
//! search words.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

/// Default BM25 column weights.
pub const BM25_WEIGHT_TITLE: f64 = 3.0;
pub const BM25_WEIGHT_AUTHORS: f64 = 1.0;
pub const BM25_WEIGHT_BODY: f64 = 2.0;
pub const BM25_WEIGHT_YEAR: f64 = 1.0;

/// Upper bound on terms taken from one query.
const MAX_QUERY_TERMS: usize = 64;

/// One lexical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub record_id: String,
    pub title: String,
    /// Raw BM25 rank from SQLite (lower = better match).
    pub rank: f64,
}

/// Compile free text into a safe FTS5 MATCH expression.
///
/// Returns `None` when the text holds no searchable terms.
#[must_use]
pub fn build_match_expression(raw: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in raw.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let term = token.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|term| format!("\"{term}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Search the FTS5 index with BM25 ranking and column weights.
///
/// # Arguments
///
/// * `conn`: SQLite connection with the corpus database open
/// * `query`: free text; compiled with [`build_match_expression`]
/// * `limit`: maximum number of results
///
/// Results are sorted by BM25 rank (lower = better), ties by record id.
///
/// # Errors
///
/// Returns an error if the database is not properly initialized.
pub fn search_bm25(conn: &Connection, query: &str, limit: u32) -> Result<Vec<LexicalMatch>> {
    let Some(expression) = build_match_expression(query) else {
        return Ok(Vec::new());
    };

    let sql = "SELECT f.record_id, r.title, bm25(records_fts, ?1, ?2, ?3, ?4) AS rank \
               FROM records_fts f \
               INNER JOIN records r ON r.record_id = f.record_id \
               WHERE records_fts MATCH ?5 \
               ORDER BY rank, f.record_id \
               LIMIT ?6";

    let mut stmt = conn
        .prepare(sql)
        .context("prepare FTS5 BM25 search query")?;

    let rows = stmt
        .query_map(
            params![
                BM25_WEIGHT_TITLE,
                BM25_WEIGHT_AUTHORS,
                BM25_WEIGHT_BODY,
                BM25_WEIGHT_YEAR,
                expression,
                limit,
            ],
            |row| {
                Ok(LexicalMatch {
                    record_id: row.get(0)?,
                    title: row.get(1)?,
                    rank: row.get(2)?,
                })
            },
        )
        .with_context(|| format!("execute FTS5 search for '{query}'"))?;

    let mut hits = Vec::new();
    for row in rows {
        hits.push(row.context("read FTS5 search hit")?);
    }
    Ok(hits)
}

/// Rebuild the FTS5 index from the current `records` table.
///
/// # Errors
///
/// Returns an error if the rebuild SQL fails.
pub fn rebuild_fts_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "SAVEPOINT rebuild_fts;
         DELETE FROM records_fts;
         INSERT INTO records_fts(rowid, title, authors, body, year, record_id)
         SELECT rowid, title, search_authors, body, COALESCE(CAST(year AS TEXT), ''), record_id
         FROM records;
         RELEASE rebuild_fts;",
    )
}

/// Whether the `records_fts` virtual table exists at all.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn fts_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'records_fts')",
        [],
        |row| row.get(0),
    )
}

/// Validate that the FTS5 index is in sync with the `records` table.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn fts_in_sync(conn: &Connection) -> rusqlite::Result<bool> {
    let records: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
    let fts: i64 = conn.query_row("SELECT COUNT(*) FROM records_fts", [], |row| row.get(0))?;
    Ok(records == fts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn insert(conn: &Connection, id: &str, title: &str, year: Option<i32>, body: &str) {
        conn.execute(
            "INSERT INTO records (record_id, title, year, body, embedding_json, content_hash,
                                  generation, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '[]', 'h', 1, 't', 't')",
            params![id, title, year, body],
        )
        .expect("insert record");
    }

    #[test]
    fn match_expression_quotes_terms_and_drops_operators() {
        let expr = build_match_expression("data NEAR(sharing) \"catalysis\" title:2015*")
            .expect("terms present");
        assert_eq!(
            expr,
            "\"data\" OR \"near\" OR \"sharing\" OR \"catalysis\" OR \"title\" OR \"2015\""
        );
    }

    #[test]
    fn match_expression_dedupes_and_handles_empty() {
        assert_eq!(build_match_expression("  ---  "), None);
        assert_eq!(
            build_match_expression("Data data DATA").as_deref(),
            Some("\"data\"")
        );
    }

    #[test]
    fn bm25_ranks_title_match_first() {
        let conn = open_in_memory().expect("db");
        insert(&conn, "a", "Data Sharing in Catalysis", Some(2015), "");
        insert(&conn, "b", "Data Sharing Practices", Some(2019), "");
        insert(&conn, "c", "Unrelated topic", None, "nothing here");

        let hits = search_bm25(&conn, "data sharing catalysis 2015", 10).expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].rank <= hits[1].rank);
    }

    #[test]
    fn hostile_query_does_not_error() {
        let conn = open_in_memory().expect("db");
        insert(&conn, "a", "Data Sharing", None, "");
        let hits = search_bm25(&conn, "\") OR 1=1; --", 10).expect("search");
        assert!(hits.is_empty());
        assert!(search_bm25(&conn, "", 10).expect("search").is_empty());
    }

    #[test]
    fn rebuild_restores_sync() {
        let conn = open_in_memory().expect("db");
        insert(&conn, "a", "Data Sharing", None, "");
        conn.execute("DELETE FROM records_fts", []).expect("wipe fts");
        assert!(!fts_in_sync(&conn).expect("sync check"));
        rebuild_fts_index(&conn).expect("rebuild");
        assert!(fts_in_sync(&conn).expect("sync check"));
        assert_eq!(search_bm25(&conn, "sharing", 10).expect("search").len(), 1);
    }

    #[test]
    fn dropped_fts_table_is_detected() {
        let conn = open_in_memory().expect("db");
        assert!(fts_table_exists(&conn).expect("exists"));
        conn.execute_batch("DROP TABLE records_fts").expect("drop");
        assert!(!fts_table_exists(&conn).expect("exists"));
    }
}
