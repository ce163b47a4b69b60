#![forbid(unsafe_code)]
//! litdb-search library.
//!
//! Hybrid retrieval over a literature corpus (BM25 fused with embedding
//! similarity), confidence matching of candidate records, and incremental
//! maintenance of the vector index.
//!
//! # Conventions
//!
//! - **Errors**: [`litdb_core::CorpusError`] for engine operations,
//!   `anyhow::Result` for external capabilities and engine setup.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod cache;
pub mod engine;
pub mod fusion;
pub mod lexical;
pub mod maintenance;
pub mod matcher;
pub mod semantic;
pub mod vector;

pub use cache::{IndexChange, IndexListener, SearchCache};
pub use engine::{Engine, EngineBuilder};
pub use fusion::{
    CrossScorer, FusionRanker, FusionWeights, Provenance, RankedHit, RankedResult, SearchRequest,
    Signal,
};
pub use lexical::{Fts5Scorer, LexicalHit, LexicalScorer};
pub use maintenance::{
    CancelFlag, IndexMaintainer, MaintenanceOutcome, ReconcileReport, ReindexReport,
};
pub use matcher::{
    CatalogLookup, ConfidenceMatcher, MatchDecision, Reference, ScoredReference, TitleSimilarity,
};
pub use semantic::Embedder;
pub use vector::{VectorHit, VectorIndex};
