//! Fusion of the lexical and vector signals into one ranking.
//!
//! Scores are min-max normalized per signal and combined with configurable
//! weights; an optional cross scorer refines the head of the ranking.

pub mod hybrid;
pub mod rerank;
pub mod scoring;

pub use hybrid::{FusionRanker, RankedResult, SearchRequest};
pub use rerank::CrossScorer;
pub use scoring::{
    FusionWeights, Provenance, RankedHit, Signal, apply_rerank, compare_hits, fuse,
    min_max_normalize,
};
