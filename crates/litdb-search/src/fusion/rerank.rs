//! Cross-scorer rerank of the fused head.

use anyhow::{Context, Result};
use litdb_core::store::RecordStore;

use super::RankedHit;

/// External relevance model scoring a query against one candidate text
/// (typically a cross-encoder). Higher is better.
pub trait CrossScorer: Send + Sync {
    /// # Errors
    ///
    /// Any model or runtime failure.
    fn score(&self, query: &str, candidate_text: &str) -> Result<f32>;
}

impl<F> CrossScorer for F
where
    F: Fn(&str, &str) -> Result<f32> + Send + Sync,
{
    fn score(&self, query: &str, candidate_text: &str) -> Result<f32> {
        self(query, candidate_text)
    }
}

/// Refined scores for the first `depth` hits, in hit order.
///
/// Candidate text is the stored record content. Any failure aborts the whole
/// rerank so that a partially refined head is never mixed with fused scores.
pub(crate) fn refine_head(
    scorer: &dyn CrossScorer,
    store: &dyn RecordStore,
    query: &str,
    hits: &[RankedHit],
    depth: usize,
) -> Result<Vec<f32>> {
    hits.iter()
        .take(depth)
        .map(|hit| {
            let stored = store
                .get(&hit.id)
                .with_context(|| format!("load rerank candidate {}", hit.id))?;
            let score = scorer
                .score(query, &stored.record.content())
                .with_context(|| format!("cross scorer failed on {}", hit.id))?;
            anyhow::ensure!(score.is_finite(), "cross scorer returned {score} for {}", hit.id);
            Ok(score)
        })
        .collect()
}
