//! Hybrid search orchestration across the lexical and vector signals.
//!
//! The ranker degrades gracefully:
//! - each requested signal runs on its own worker thread and is joined with a
//!   deadline; a timeout counts as a failure of that signal
//! - one failed signal yields a result built from the other, flagged with
//!   [`RankedResult::degraded`]
//! - only when every requested signal fails is the search an error
//!
//! Results depend only on the corpus state and the request: the workers'
//! timing never affects order or scores.

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use litdb_core::config::SearchConfig;
use litdb_core::error::CorpusError;
use litdb_core::model::validate_vector;
use litdb_core::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::rerank::{CrossScorer, refine_head};
use super::scoring::{FusionWeights, RankedHit, Signal, apply_rerank, fuse};
use crate::cache::{SearchCache, SearchKey};
use crate::lexical::LexicalScorer;
use crate::semantic::Embedder;
use crate::vector::VectorIndex;

/// A hybrid search request. At least one of `text` and `vector` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub k: usize,
    /// Per-call override of the configured weights.
    pub weights: Option<FusionWeights>,
}

impl SearchRequest {
    pub fn text(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: Some(text.into()),
            k,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn vector(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector: Some(vector),
            k,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    #[must_use]
    pub const fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Trimmed query text, `None` when absent or blank.
    #[must_use]
    pub fn query_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Final ranking plus the partial-result flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub hits: Vec<RankedHit>,
    /// The signal that failed, when the ranking was built from the other one.
    pub degraded: Option<Signal>,
}

impl RankedResult {
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.degraded.is_some()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.id.as_str()).collect()
    }
}

type Scored = Vec<(String, f32)>;

/// Outcome of one signal after the join.
enum Side {
    NotRequested,
    Ready(Scored),
    Failed(String),
}

/// A signal that was started, or could not be started.
enum Pending {
    NotRequested,
    Running(Receiver<anyhow::Result<Scored>>),
    Unavailable(String),
}

/// Hybrid ranker combining a [`LexicalScorer`] with the [`VectorIndex`].
pub struct FusionRanker {
    index: Arc<VectorIndex>,
    store: Arc<dyn RecordStore>,
    lexical: Option<Arc<dyn LexicalScorer>>,
    embedder: Option<Arc<dyn Embedder>>,
    cross: Option<Arc<dyn CrossScorer>>,
    cache: Option<Arc<SearchCache>>,
    config: SearchConfig,
}

impl FusionRanker {
    #[must_use]
    pub fn new(index: Arc<VectorIndex>, store: Arc<dyn RecordStore>, config: SearchConfig) -> Self {
        Self {
            index,
            store,
            lexical: None,
            embedder: None,
            cross: None,
            cache: None,
            config,
        }
    }

    #[must_use]
    pub fn with_lexical(mut self, scorer: Arc<dyn LexicalScorer>) -> Self {
        self.lexical = Some(scorer);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_cross_scorer(mut self, scorer: Arc<dyn CrossScorer>) -> Self {
        self.cross = Some(scorer);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Rank stored records against `request`.
    ///
    /// # Errors
    ///
    /// - [`CorpusError::InvalidQuery`] when neither text nor vector is given,
    ///   or the weights are invalid
    /// - [`CorpusError::DimensionMismatch`] / [`CorpusError::InvalidVector`]
    ///   for a malformed query vector
    /// - [`CorpusError::RetrievalUnavailable`] when every requested signal
    ///   failed
    pub fn search(&self, request: &SearchRequest) -> Result<RankedResult, CorpusError> {
        let k = request.k.min(self.config.max_results);
        if k == 0 {
            return Ok(RankedResult::default());
        }

        let weights = request
            .weights
            .unwrap_or_else(|| FusionWeights::from_config(&self.config));
        weights.validate()?;

        let text = request.query_text();
        if text.is_none() && request.vector.is_none() {
            return Err(CorpusError::InvalidQuery(
                "search needs query text, a query vector, or both".into(),
            ));
        }
        if let Some(vector) = &request.vector {
            validate_vector("<query>", vector, self.index.dimension())?;
        }

        let key = self
            .cache
            .as_ref()
            .map(|cache| SearchKey::new(request, k, weights, cache.epoch()));
        let cached = self
            .cache
            .as_ref()
            .zip(key.as_ref())
            .and_then(|(cache, key)| cache.get(key));
        if let Some(hit) = cached {
            return Ok((*hit).clone());
        }

        let depth = if self.cross.is_some() {
            k.saturating_mul(self.config.rerank_depth_factor)
        } else {
            k
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.subcall_timeout_ms);
        let lexical = self.start_lexical(text, depth);
        let vector = self.start_vector(text, request.vector.clone(), depth);
        let lexical = self.join(lexical, deadline);
        let vector = self.join(vector, deadline);

        let (lexical, vector, degraded) = resolve_sides(lexical, vector)?;
        if let Some(signal) = degraded {
            warn!("{signal} signal unavailable, ranking from the other signal only");
        }

        let mut hits = fuse(&lexical, &vector, weights);
        let mut rerank_failed = false;
        if let (Some(cross), Some(query)) = (&self.cross, text) {
            match refine_head(cross.as_ref(), self.store.as_ref(), query, &hits, depth) {
                Ok(refined) => apply_rerank(&mut hits, &refined),
                Err(err) => {
                    warn!("rerank skipped, keeping fused order: {err:#}");
                    rerank_failed = true;
                }
            }
        }
        hits.truncate(k);

        let result = RankedResult { hits, degraded };
        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if rerank_failed {
                debug!("not caching search result with failed rerank");
            } else {
                cache.insert(key, &result);
            }
        }
        Ok(result)
    }

    fn start_lexical(&self, text: Option<&str>, depth: usize) -> Pending {
        let Some(text) = text else {
            return Pending::NotRequested;
        };
        let Some(scorer) = &self.lexical else {
            return Pending::Unavailable("no lexical scorer configured".into());
        };
        let scorer = Arc::clone(scorer);
        let text = text.to_owned();
        spawn_side("litdb-lexical", move || {
            let hits = scorer.score(&text, depth)?;
            Ok(hits.into_iter().map(|h| (h.id, h.score)).collect())
        })
    }

    fn start_vector(&self, text: Option<&str>, vector: Option<Vec<f32>>, depth: usize) -> Pending {
        let index = Arc::clone(&self.index);
        let query = match (vector, text) {
            (Some(vector), _) => QueryVector::Given(vector),
            (None, Some(text)) => match &self.embedder {
                Some(embedder) => QueryVector::Embed(Arc::clone(embedder), text.to_owned()),
                None => return Pending::Unavailable("no embedder configured".into()),
            },
            (None, None) => return Pending::NotRequested,
        };
        spawn_side("litdb-vector", move || {
            let vector = match query {
                QueryVector::Given(vector) => vector,
                QueryVector::Embed(embedder, text) => embedder.embed(&text)?,
            };
            let hits = index.query(&vector, depth)?;
            Ok(hits.into_iter().map(|h| (h.id, h.similarity)).collect())
        })
    }

    fn join(&self, pending: Pending, deadline: Instant) -> Side {
        match pending {
            Pending::NotRequested => Side::NotRequested,
            Pending::Unavailable(reason) => Side::Failed(reason),
            Pending::Running(rx) => match rx.recv_deadline(deadline) {
                Ok(Ok(scored)) => Side::Ready(scored),
                Ok(Err(err)) => Side::Failed(format!("{err:#}")),
                Err(RecvTimeoutError::Timeout) => Side::Failed(format!(
                    "timed out after {} ms",
                    self.config.subcall_timeout_ms
                )),
                Err(RecvTimeoutError::Disconnected) => {
                    Side::Failed("worker exited without a result".into())
                }
            },
        }
    }
}

enum QueryVector {
    Given(Vec<f32>),
    Embed(Arc<dyn Embedder>, String),
}

/// Run `work` on a detached thread. A worker that outlives the deadline
/// finishes on its own; its late result is dropped with the channel.
fn spawn_side<F>(name: &str, work: F) -> Pending
where
    F: FnOnce() -> anyhow::Result<Scored> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new().name(name.to_owned()).spawn(move || {
        let _ = tx.send(work());
    });
    match spawned {
        Ok(_) => Pending::Running(rx),
        Err(err) => Pending::Unavailable(format!("could not start {name} worker: {err}")),
    }
}

fn resolve_sides(
    lexical: Side,
    vector: Side,
) -> Result<(Scored, Scored, Option<Signal>), CorpusError> {
    match (lexical, vector) {
        (Side::Ready(l), Side::Ready(v)) => Ok((l, v, None)),
        (Side::Ready(l), Side::NotRequested) => Ok((l, Vec::new(), None)),
        (Side::NotRequested, Side::Ready(v)) => Ok((Vec::new(), v, None)),
        (Side::Ready(l), Side::Failed(reason)) => {
            debug!("vector signal failed: {reason}");
            Ok((l, Vec::new(), Some(Signal::Vector)))
        }
        (Side::Failed(reason), Side::Ready(v)) => {
            debug!("lexical signal failed: {reason}");
            Ok((Vec::new(), v, Some(Signal::Lexical)))
        }
        (lexical, vector) => Err(CorpusError::RetrievalUnavailable {
            lexical: describe(lexical),
            vector: describe(vector),
        }),
    }
}

fn describe(side: Side) -> String {
    match side {
        Side::NotRequested => "not requested".into(),
        Side::Ready(_) => "ok".into(),
        Side::Failed(reason) => reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::{Fts5Scorer, LexicalHit};
    use litdb_core::model::Record;
    use litdb_core::store::{PutMode, SqliteRecordStore};

    fn setup() -> (Arc<SqliteRecordStore>, Arc<VectorIndex>) {
        let store = Arc::new(SqliteRecordStore::in_memory(3).expect("store"));
        let index = Arc::new(VectorIndex::new(3));
        for (id, title, vector) in [
            ("r1", "Zeolite catalysts for methanol conversion", [1.0, 0.0, 0.0]),
            ("r2", "Zeolite membranes under humid conditions", [0.8, 0.6, 0.0]),
            ("r3", "Open data practices in chemistry", [0.0, 0.0, 1.0]),
        ] {
            let outcome = store
                .put(
                    Record::new(id, title).with_embedding(vector.to_vec()),
                    PutMode::Upsert,
                )
                .expect("put");
            index
                .upsert(id, &vector, outcome.generation())
                .expect("index");
        }
        (store, index)
    }

    fn ranker(store: &Arc<SqliteRecordStore>, index: &Arc<VectorIndex>) -> FusionRanker {
        let records: Arc<dyn RecordStore> = Arc::clone(store) as Arc<dyn RecordStore>;
        FusionRanker::new(Arc::clone(index), records, SearchConfig::default())
            .with_lexical(Arc::new(Fts5Scorer::new(Arc::clone(store))))
    }

    #[test]
    fn lexical_only_search_without_embedder_is_partial() {
        let (store, index) = setup();
        let result = ranker(&store, &index)
            .search(&SearchRequest::text("zeolite", 10))
            .expect("search");

        assert_eq!(result.degraded, Some(Signal::Vector));
        assert_eq!(result.hits.len(), 2);
        assert!(result.hits.iter().all(|h| h.vector_score.is_none()));
    }

    #[test]
    fn vector_only_search_is_complete() {
        let (store, index) = setup();
        let result = ranker(&store, &index)
            .search(&SearchRequest::vector(vec![1.0, 0.0, 0.0], 2))
            .expect("search");

        assert_eq!(result.degraded, None);
        assert_eq!(result.ids(), vec!["r1", "r2"]);
    }

    #[test]
    fn respects_limit_and_zero_limit() {
        let (store, index) = setup();
        let ranker = ranker(&store, &index);
        let request = SearchRequest::text("zeolite", 1).with_vector(vec![1.0, 0.0, 0.0]);
        assert_eq!(ranker.search(&request).expect("search").hits.len(), 1);

        let empty = SearchRequest::text("zeolite", 0);
        assert!(ranker.search(&empty).expect("search").hits.is_empty());
    }

    #[test]
    fn empty_request_is_invalid() {
        let (store, index) = setup();
        let err = ranker(&store, &index)
            .search(&SearchRequest::text("   ", 5))
            .unwrap_err();
        assert!(matches!(err, CorpusError::InvalidQuery(_)));
    }

    #[test]
    fn wrong_query_dimension_is_rejected() {
        let (store, index) = setup();
        let err = ranker(&store, &index)
            .search(&SearchRequest::vector(vec![1.0, 0.0], 5))
            .unwrap_err();
        assert!(matches!(err, CorpusError::DimensionMismatch { .. }));
    }

    #[test]
    fn slow_lexical_scorer_times_out_into_partial_result() {
        struct Slow;
        impl LexicalScorer for Slow {
            fn score(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<LexicalHit>> {
                thread::sleep(Duration::from_millis(300));
                Ok(Vec::new())
            }
        }

        let (store, index) = setup();
        let config = SearchConfig {
            subcall_timeout_ms: 20,
            ..SearchConfig::default()
        };
        let records: Arc<dyn RecordStore> = store;
        let ranker = FusionRanker::new(index, records, config).with_lexical(Arc::new(Slow));
        let request = SearchRequest::text("zeolite", 3).with_vector(vec![1.0, 0.0, 0.0]);

        let result = ranker.search(&request).expect("search");
        assert_eq!(result.degraded, Some(Signal::Lexical));
        assert_eq!(result.hits[0].id, "r1");
    }

    #[test]
    fn cross_scorer_reorders_fused_head() {
        let (store, index) = setup();
        let cross = |_query: &str, text: &str| -> anyhow::Result<f32> {
            Ok(if text.contains("membranes") { 0.99 } else { 0.1 })
        };
        let ranker = ranker(&store, &index).with_cross_scorer(Arc::new(cross));
        let request = SearchRequest::text("zeolite", 2).with_vector(vec![1.0, 0.0, 0.0]);

        let result = ranker.search(&request).expect("search");
        assert_eq!(result.hits[0].id, "r2");
        assert!(result.hits.iter().all(|h| h.reranked));
    }

    #[test]
    fn failing_cross_scorer_keeps_fused_order() {
        let (store, index) = setup();
        let cross = |_q: &str, _t: &str| -> anyhow::Result<f32> { anyhow::bail!("model offline") };
        let ranker = ranker(&store, &index).with_cross_scorer(Arc::new(cross));
        let request = SearchRequest::text("zeolite", 2).with_vector(vec![1.0, 0.0, 0.0]);

        let result = ranker.search(&request).expect("search");
        assert_eq!(result.hits[0].id, "r1");
        assert!(result.hits.iter().all(|h| !h.reranked));
    }
}
