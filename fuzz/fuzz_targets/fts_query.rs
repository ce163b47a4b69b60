#![no_main]

//! Untrusted query text must always compile to a MATCH expression SQLite
//! accepts: no input may surface as an FTS5 syntax error.

use libfuzzer_sys::fuzz_target;
use litdb_core::db::fts::{build_match_expression, search_bm25};
use litdb_core::db::open_in_memory;
use std::sync::OnceLock;
use std::sync::Mutex;

static DB: OnceLock<Mutex<rusqlite::Connection>> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let Ok(query) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(expr) = build_match_expression(query) {
        assert!(!expr.is_empty());
    }

    let db = DB.get_or_init(|| Mutex::new(open_in_memory().expect("in-memory corpus")));
    let conn = db.lock().expect("fuzz db lock");
    search_bm25(&conn, query, 10).expect("compiled query must be valid FTS5");
});
