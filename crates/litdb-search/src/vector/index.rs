//! Exact cosine-similarity index over record embeddings.
//!
//! Entries live in a sharded concurrent map. Each entry is an immutable
//! `Arc` holding the vector, its cached norm and the record generation it was
//! built from; replacing a vector swaps the whole `Arc`, so a concurrent query
//! sees either the old or the new vector and never a mix.
//!
//! Queries are an exact linear scan with a bounded heap of size `k`. At the
//! corpus sizes this targets (tens of thousands of records) the scan is fast
//! enough and recall is always 1.0, so no approximate structure is kept.

use dashmap::DashMap;
use litdb_core::error::CorpusError;
use litdb_core::model::validate_vector;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A single vector search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub id: String,
    /// Raw cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

#[derive(Debug)]
struct IndexEntry {
    vector: Vec<f32>,
    norm: f32,
    generation: u64,
}

/// In-memory vector index with a corpus-fixed dimension.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    entries: DashMap<String, Arc<IndexEntry>>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace the vector for `id`.
    ///
    /// Returns `false` when the same generation and vector were already
    /// indexed.
    ///
    /// # Errors
    ///
    /// [`CorpusError::DimensionMismatch`] or [`CorpusError::InvalidVector`];
    /// the index is left untouched.
    pub fn upsert(&self, id: &str, vector: &[f32], generation: u64) -> Result<bool, CorpusError> {
        validate_vector(id, vector, self.dimension)?;

        let unchanged = self
            .entries
            .get(id)
            .is_some_and(|current| current.generation == generation && current.vector == vector);
        if unchanged {
            return Ok(false);
        }

        let entry = IndexEntry {
            vector: vector.to_vec(),
            norm: l2_norm(vector),
            generation,
        };
        self.entries.insert(id.to_owned(), Arc::new(entry));
        Ok(true)
    }

    /// Remove `id`. Returns `false` if it was not indexed.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Record generation the entry for `id` was built from.
    #[must_use]
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.generation)
    }

    /// Copy of the indexed vector for `id`.
    #[must_use]
    pub fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.entries.get(id).map(|entry| entry.vector.clone())
    }

    /// All indexed identifiers in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Ties are broken by identifier ascending. The result always holds
    /// `min(k, len)` hits; zero-norm vectors score `0.0`.
    ///
    /// # Errors
    ///
    /// [`CorpusError::DimensionMismatch`] or [`CorpusError::InvalidVector`]
    /// for a malformed query vector.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, CorpusError> {
        validate_vector("<query>", query, self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query);
        let k = k.min(self.entries.len());
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(k.saturating_add(1));

        for entry in &self.entries {
            let candidate = Ranked {
                similarity: cosine(query, query_norm, &entry.vector, entry.norm),
                id: entry.key().clone(),
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|ranked| VectorHit {
                id: ranked.id,
                similarity: ranked.similarity,
            })
            .collect())
    }
}

/// Heap element ordered so that "greater" means "ranks worse": lower
/// similarity, then larger id. The max-heap therefore keeps the current worst
/// hit on top, and `into_sorted_vec` yields best-first order.
#[derive(Debug)]
struct Ranked {
    similarity: f32,
    id: String,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn cosine(left: &[f32], left_norm: f32, right: &[f32], right_norm: f32) -> f32 {
    let denom = left_norm * right_norm;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    (dot / denom).clamp(-1.0, 1.0)
}
