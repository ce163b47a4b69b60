//! Confidence matching of candidate records against a reference pool.
//!
//! Each reference gets a combined score:
//!
//! ```text
//! combined = title_weight * title_similarity + year_weight * year_bonus
//! ```
//!
//! with `year_bonus` 1.0 for the same year, `near_year_credit` for years one
//! apart, and 0.0 otherwise (including a missing year on either side).
//!
//! | Condition on the best reference                   | Decision            |
//! |---------------------------------------------------|---------------------|
//! | identifier equal after DOI normalization          | `Accepted` (1.0)    |
//! | title >= `accept_threshold` and exact year        | `Accepted`          |
//! | combined >= `confirm_threshold`                   | `NeedsConfirmation` |
//! | otherwise, or an empty pool                       | `Rejected`          |
//!
//! Decisions are returned to the caller and never persisted here.

mod similarity;

pub use similarity::{BuiltinSimilarity, TitleSimilarity, gestalt_ratio, token_jaccard};

use anyhow::Result;
use litdb_core::config::MatchConfig;
use litdb_core::model::{Candidate, Record, StoredRecord, normalize_identifier};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// External bibliographic catalog queried for a reference pool.
pub trait CatalogLookup: Send + Sync {
    /// # Errors
    ///
    /// Any network or catalog failure.
    fn lookup(&self, candidate: &Candidate) -> Result<Vec<Candidate>>;
}

impl<F> CatalogLookup for F
where
    F: Fn(&Candidate) -> Result<Vec<Candidate>> + Send + Sync,
{
    fn lookup(&self, candidate: &Candidate) -> Result<Vec<Candidate>> {
        self(candidate)
    }
}

/// A pool entry a candidate may be matched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>, title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            year,
            authors: Vec::new(),
        }
    }

    /// A catalog hit becomes a reference only when it carries an id.
    #[must_use]
    pub fn from_candidate(candidate: &Candidate) -> Option<Self> {
        candidate.id.as_ref().map(|id| Self {
            id: id.clone(),
            title: candidate.title.clone(),
            year: candidate.year,
            authors: candidate.authors.clone(),
        })
    }
}

impl From<&Record> for Reference {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            year: record.year,
            authors: record.authors.clone(),
        }
    }
}

impl From<&StoredRecord> for Reference {
    fn from(stored: &StoredRecord) -> Self {
        Self::from(&stored.record)
    }
}

/// A reference with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredReference {
    pub reference: Reference,
    pub title_similarity: f32,
    pub year_bonus: f32,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    Accepted { id: String, score: f32 },
    /// Best references, highest first, for a human to choose from.
    NeedsConfirmation { options: Vec<ScoredReference> },
    Rejected,
}

impl MatchDecision {
    #[must_use]
    pub fn accepted_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { id, .. } => Some(id),
            _ => None,
        }
    }
}

pub struct ConfidenceMatcher {
    config: MatchConfig,
    similarity: Arc<dyn TitleSimilarity>,
}

impl ConfidenceMatcher {
    /// Matcher using the configured built-in title measure.
    #[must_use]
    pub fn new(config: MatchConfig) -> Self {
        let similarity = Arc::new(BuiltinSimilarity(config.title_metric));
        Self { config, similarity }
    }

    #[must_use]
    pub fn with_similarity(mut self, similarity: Arc<dyn TitleSimilarity>) -> Self {
        self.similarity = similarity;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &MatchConfig {
        &self.config
    }

    fn year_bonus(&self, candidate: Option<i32>, reference: Option<i32>) -> f32 {
        match (candidate, reference) {
            (Some(a), Some(b)) if a == b => 1.0,
            (Some(a), Some(b)) if a.abs_diff(b) == 1 => self.config.near_year_credit,
            _ => 0.0,
        }
    }

    /// Score one reference.
    #[must_use]
    pub fn score(&self, candidate: &Candidate, reference: &Reference) -> ScoredReference {
        let title_similarity = self
            .similarity
            .similarity(&candidate.title, &reference.title)
            .clamp(0.0, 1.0);
        let year_bonus = self.year_bonus(candidate.year, reference.year);
        ScoredReference {
            reference: reference.clone(),
            title_similarity,
            year_bonus,
            score: self.config.title_weight * title_similarity
                + self.config.year_weight * year_bonus,
        }
    }

    /// Score the whole pool, best first: combined score, then title
    /// similarity, then id.
    #[must_use]
    pub fn rank(&self, candidate: &Candidate, pool: &[Reference]) -> Vec<ScoredReference> {
        let mut scored: Vec<ScoredReference> =
            pool.iter().map(|r| self.score(candidate, r)).collect();
        scored.sort_by(compare_scored);
        scored
    }

    /// Decide whether `candidate` is one of the references in `pool`.
    #[must_use]
    pub fn resolve(&self, candidate: &Candidate, pool: &[Reference]) -> MatchDecision {
        if pool.is_empty() {
            return MatchDecision::Rejected;
        }

        if let Some(id) = candidate.id.as_deref() {
            let wanted = normalize_identifier(id);
            if !wanted.is_empty() {
                let same = pool
                    .iter()
                    .filter(|r| normalize_identifier(&r.id) == wanted)
                    .min_by(|a, b| a.id.cmp(&b.id));
                if let Some(reference) = same {
                    return MatchDecision::Accepted {
                        id: reference.id.clone(),
                        score: 1.0,
                    };
                }
            }
        }

        let mut ranked = self.rank(candidate, pool);
        let Some(best) = ranked.first() else {
            return MatchDecision::Rejected;
        };

        let exact_year = matches!((candidate.year, best.reference.year), (Some(a), Some(b)) if a == b);
        if best.title_similarity >= self.config.accept_threshold && exact_year {
            return MatchDecision::Accepted {
                id: best.reference.id.clone(),
                score: best.score,
            };
        }
        if best.score >= self.config.confirm_threshold {
            ranked.truncate(self.config.confirm_top_n.max(1));
            return MatchDecision::NeedsConfirmation { options: ranked };
        }
        MatchDecision::Rejected
    }
}

fn compare_scored(a: &ScoredReference, b: &ScoredReference) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.title_similarity.total_cmp(&a.title_similarity))
        .then_with(|| a.reference.id.cmp(&b.reference.id))
}
