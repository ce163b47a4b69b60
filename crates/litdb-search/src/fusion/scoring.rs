//! Score fusion for hybrid retrieval.
//!
//! Each signal's list is min-max normalized to `[0, 1]` on its own, then the
//! two are combined with a weighted sum:
//!
//! ```text
//! fused = w_lex * norm_lex + w_vec * norm_vec
//! ```
//!
//! A candidate missing from one list contributes `0` for that signal; it is
//! never dropped. Final order is fused score descending, then candidates
//! present in both lists, then identifier ascending, so a fixed input always
//! yields the same ranking.
//!
//! When a cross scorer is configured, [`apply_rerank`] replaces the score of
//! the top `M` candidates with the refined score and reorders only that
//! prefix.

use litdb_core::config::SearchConfig;
use litdb_core::error::CorpusError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A ranking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Lexical,
    Vector,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexical => f.write_str("lexical"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// Per-signal weights of the linear combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub lexical: f32,
    pub vector: f32,
}

impl FusionWeights {
    #[must_use]
    pub const fn new(lexical: f32, vector: f32) -> Self {
        Self { lexical, vector }
    }

    #[must_use]
    pub const fn from_config(config: &SearchConfig) -> Self {
        Self {
            lexical: config.lexical_weight,
            vector: config.vector_weight,
        }
    }

    /// # Errors
    ///
    /// [`CorpusError::InvalidQuery`] for negative, non-finite or all-zero
    /// weights.
    pub fn validate(&self) -> Result<(), CorpusError> {
        let finite = self.lexical.is_finite() && self.vector.is_finite();
        if !finite || self.lexical < 0.0 || self.vector < 0.0 {
            return Err(CorpusError::InvalidQuery(format!(
                "fusion weights must be finite and non-negative (lexical {}, vector {})",
                self.lexical, self.vector
            )));
        }
        if self.lexical + self.vector <= 0.0 {
            return Err(CorpusError::InvalidQuery(
                "at least one fusion weight must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// Which signals produced a hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub lexical: bool,
    pub vector: bool,
}

impl Provenance {
    #[must_use]
    pub const fn both(self) -> bool {
        self.lexical && self.vector
    }
}

/// One entry of a fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub id: String,
    /// Score the hit is ordered by: the refined score when reranked,
    /// otherwise the fused score.
    pub score: f32,
    pub fused_score: f32,
    /// Normalized lexical score, `None` when absent from the lexical list.
    pub lexical_score: Option<f32>,
    /// Normalized vector score, `None` when absent from the vector list.
    pub vector_score: Option<f32>,
    pub provenance: Provenance,
    pub reranked: bool,
}

/// Min-max normalize raw scores to `[0, 1]`.
///
/// When every score is equal (including a single-element list) each entry
/// normalizes to `1.0`.
#[must_use]
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(first) = scores.first() else {
        return Vec::new();
    };
    let (min, max) = scores
        .iter()
        .fold((*first, *first), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    let span = max - min;
    if span <= 0.0 {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| ((s - min) / span).clamp(0.0, 1.0)).collect()
}

/// Keep the best score per id and drop non-finite entries.
fn dedup_scores(list: &[(String, f32)]) -> BTreeMap<&str, f32> {
    let mut best: BTreeMap<&str, f32> = BTreeMap::new();
    for (id, score) in list {
        if !score.is_finite() {
            continue;
        }
        best.entry(id.as_str())
            .and_modify(|current| *current = current.max(*score))
            .or_insert(*score);
    }
    best
}

fn normalized(list: &[(String, f32)]) -> BTreeMap<&str, f32> {
    let best = dedup_scores(list);
    let raw: Vec<f32> = best.values().copied().collect();
    best.into_keys().zip(min_max_normalize(&raw)).collect()
}

/// Fuse two raw-score lists into a ranking ordered by [`compare_hits`].
///
/// Scores in either list are "higher is better"; their scales need not
/// agree.
#[must_use]
pub fn fuse(
    lexical: &[(String, f32)],
    vector: &[(String, f32)],
    weights: FusionWeights,
) -> Vec<RankedHit> {
    let lexical = normalized(lexical);
    let vector = normalized(vector);

    let mut ids: Vec<&str> = lexical.keys().chain(vector.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hits: Vec<RankedHit> = ids
        .into_iter()
        .map(|id| {
            let lexical_score = lexical.get(id).copied();
            let vector_score = vector.get(id).copied();
            let fused = weights.lexical * lexical_score.unwrap_or(0.0)
                + weights.vector * vector_score.unwrap_or(0.0);
            RankedHit {
                id: id.to_owned(),
                score: fused,
                fused_score: fused,
                lexical_score,
                vector_score,
                provenance: Provenance {
                    lexical: lexical_score.is_some(),
                    vector: vector_score.is_some(),
                },
                reranked: false,
            }
        })
        .collect();

    hits.sort_by(compare_hits);
    hits
}

/// Ranking order: score descending, then present in both lists, then id.
#[must_use]
pub fn compare_hits(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.provenance.both().cmp(&a.provenance.both()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Replace the scores of the first `refined.len()` hits and reorder that
/// prefix by refined score descending, id ascending. Hits past the prefix
/// keep their fused order after it.
pub fn apply_rerank(hits: &mut [RankedHit], refined: &[f32]) {
    let depth = refined.len().min(hits.len());
    let head = &mut hits[..depth];
    for (hit, score) in head.iter_mut().zip(refined) {
        hit.score = *score;
        hit.reranked = true;
    }
    head.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, f32)]) -> Vec<(String, f32)> {
        entries.iter().map(|(id, s)| ((*id).to_owned(), *s)).collect()
    }

    fn ids(hits: &[RankedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn normalize_maps_range_to_unit_interval() {
        let out = min_max_normalize(&[2.0, 4.0, 3.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_equal_scores_to_one() {
        assert_eq!(min_max_normalize(&[7.0, 7.0]), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[-3.0]), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn missing_signal_contributes_zero_but_keeps_candidate() {
        let lexical = list(&[("a", 10.0), ("b", 5.0)]);
        let vector = list(&[("c", 0.9)]);
        let hits = fuse(&lexical, &vector, FusionWeights::new(0.5, 0.5));

        assert_eq!(hits.len(), 3);
        let c = hits.iter().find(|h| h.id == "c").expect("c present");
        assert_eq!(c.lexical_score, None);
        assert!((c.score - 0.5).abs() < 1e-6);
        assert!(!c.provenance.lexical && c.provenance.vector);
    }

    #[test]
    fn tie_prefers_presence_in_both_then_id() {
        // a: lexical 1.0 only; b: vector 1.0 only; c: both at 0.5 each.
        let lexical = list(&[("a", 3.0), ("c", 2.0), ("z", 1.0)]);
        let vector = list(&[("b", 1.0), ("c", 0.5), ("y", 0.0)]);
        let hits = fuse(&lexical, &vector, FusionWeights::new(0.5, 0.5));

        let top: Vec<&str> = ids(&hits).into_iter().take(3).collect();
        assert_eq!(top, vec!["c", "a", "b"]);
    }

    #[test]
    fn weights_shift_the_ranking() {
        let lexical = list(&[("a", 1.0), ("b", 0.0)]);
        let vector = list(&[("b", 1.0), ("a", 0.0)]);

        let lex_heavy = fuse(&lexical, &vector, FusionWeights::new(0.8, 0.2));
        assert_eq!(ids(&lex_heavy), vec!["a", "b"]);

        let vec_heavy = fuse(&lexical, &vector, FusionWeights::new(0.2, 0.8));
        assert_eq!(ids(&vec_heavy), vec!["b", "a"]);
    }

    #[test]
    fn duplicate_and_non_finite_entries_are_cleaned() {
        let lexical = list(&[("a", 1.0), ("a", 3.0), ("b", f32::NAN), ("c", 2.0)]);
        let hits = fuse(&lexical, &[], FusionWeights::new(1.0, 0.0));
        assert_eq!(ids(&hits), vec!["a", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rerank_reorders_only_the_prefix() {
        let lexical = list(&[("a", 4.0), ("b", 3.0), ("c", 2.0), ("d", 1.0)]);
        let mut hits = fuse(&lexical, &[], FusionWeights::new(1.0, 0.0));
        apply_rerank(&mut hits, &[0.1, 0.9]);

        assert_eq!(ids(&hits), vec!["b", "a", "c", "d"]);
        assert!(hits[0].reranked && hits[1].reranked);
        assert!(!hits[2].reranked);
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert!((hits[0].fused_score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn weights_validation() {
        assert!(FusionWeights::new(0.5, 0.5).validate().is_ok());
        assert!(FusionWeights::new(0.0, 1.0).validate().is_ok());
        assert!(FusionWeights::new(-0.1, 1.0).validate().is_err());
        assert!(FusionWeights::new(0.0, 0.0).validate().is_err());
        assert!(FusionWeights::new(f32::NAN, 1.0).validate().is_err());
    }
}
