//! Canonical SQLite schema for the litdb corpus database.
//!
//! - `records` is the source of truth for record content and embeddings
//! - `records_fts` mirrors `records` through triggers for BM25 search
//! - `vector_entries` is the durable snapshot of the in-memory vector index,
//!   keyed by record id and stamped with the record generation it was built
//!   from
//! - `corpus_meta` pins the schema version and the corpus embedding dimension

/// Migration v1: records, corpus metadata, and the vector snapshot table.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
    record_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    year INTEGER,
    authors_json TEXT NOT NULL DEFAULT '[]',
    search_authors TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    embedding_json TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    generation INTEGER NOT NULL CHECK (generation >= 1),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (length(trim(record_id)) > 0)
);

CREATE TABLE IF NOT EXISTS vector_entries (
    record_id TEXT PRIMARY KEY,
    generation INTEGER NOT NULL CHECK (generation >= 1),
    dimension INTEGER NOT NULL CHECK (dimension > 0),
    embedding_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS corpus_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    dimension INTEGER
);

INSERT OR IGNORE INTO corpus_meta (id, schema_version, dimension) VALUES (1, 1, NULL);
";

/// Migration v2: read-path indexes and FTS5 table/triggers.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_year
    ON records(year);

CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    title,
    authors,
    body,
    year,
    record_id UNINDEXED,
    tokenize='porter unicode61',
    prefix='2 3'
);

CREATE TRIGGER IF NOT EXISTS records_ai
AFTER INSERT ON records
BEGIN
    INSERT INTO records_fts(rowid, title, authors, body, year, record_id)
    VALUES (
        new.rowid,
        new.title,
        new.search_authors,
        new.body,
        COALESCE(CAST(new.year AS TEXT), ''),
        new.record_id
    );
END;

CREATE TRIGGER IF NOT EXISTS records_au
AFTER UPDATE ON records
BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, authors, body, year, record_id)
    VALUES (
        'delete',
        old.rowid,
        old.title,
        old.search_authors,
        old.body,
        COALESCE(CAST(old.year AS TEXT), ''),
        old.record_id
    );

    INSERT INTO records_fts(rowid, title, authors, body, year, record_id)
    VALUES (
        new.rowid,
        new.title,
        new.search_authors,
        new.body,
        COALESCE(CAST(new.year AS TEXT), ''),
        new.record_id
    );
END;

CREATE TRIGGER IF NOT EXISTS records_ad
AFTER DELETE ON records
BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, authors, body, year, record_id)
    VALUES (
        'delete',
        old.rowid,
        old.title,
        old.search_authors,
        old.body,
        COALESCE(CAST(old.year AS TEXT), ''),
        old.record_id
    );
END;

DELETE FROM records_fts;
INSERT INTO records_fts(rowid, title, authors, body, year, record_id)
SELECT
    rowid,
    title,
    search_authors,
    body,
    COALESCE(CAST(year AS TEXT), ''),
    record_id
FROM records;
";

/// Indexes expected by the read paths.
pub const REQUIRED_INDEXES: &[&str] = &["idx_records_year"];
