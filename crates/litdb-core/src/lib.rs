#![forbid(unsafe_code)]
//! litdb-core library.
//!
//! Record model, corpus database, and the record store that owns record
//! content and embeddings.
//!
//! # Conventions
//!
//! - **Errors**: [`error::CorpusError`] for store operations, `anyhow::Result`
//!   for configuration and database setup.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod model;
pub mod store;

pub use config::{EngineConfig, IndexConfig, MatchConfig, SearchConfig, TitleMetric};
pub use error::{CorpusError, ErrorCode};
pub use model::{Candidate, Record, StoredRecord};
pub use store::{MemoryRecordStore, PutMode, PutOutcome, RecordStore, SqliteRecordStore};
