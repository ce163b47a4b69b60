//! Engine facade: one handle for search, resolution and index maintenance.
//!
//! ```rust,ignore
//! use litdb_core::config::load_config;
//! use litdb_search::{Engine, SearchRequest};
//!
//! let config = load_config(Path::new("litdb.toml"))?;
//! let engine = Engine::builder(config)
//!     .with_embedder(Arc::new(my_model))
//!     .open(Path::new("corpus.db"))?;
//! let result = engine.search(&SearchRequest::text("data sharing catalysis", 10))?;
//! ```

use anyhow::{Context, Result};
use litdb_core::config::EngineConfig;
use litdb_core::error::CorpusError;
use litdb_core::model::{Candidate, Record, StoredRecord, normalize_identifier};
use litdb_core::store::{RecordStore, SqliteRecordStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cache::{IndexListener, SearchCache};
use crate::fusion::{CrossScorer, FusionRanker, RankedResult, SearchRequest};
use crate::lexical::{Fts5Scorer, LexicalScorer};
use crate::maintenance::{
    CancelFlag, IndexMaintainer, MaintenanceOutcome, ReconcileReport, ReindexReport,
};
use crate::matcher::{CatalogLookup, ConfidenceMatcher, MatchDecision, Reference, TitleSimilarity};
use crate::semantic::Embedder;
use crate::vector::{DurableVectors, VectorHit, VectorIndex};

/// Collects capabilities before the engine is opened.
pub struct EngineBuilder {
    config: EngineConfig,
    lexical: Option<Arc<dyn LexicalScorer>>,
    embedder: Option<Arc<dyn Embedder>>,
    cross: Option<Arc<dyn CrossScorer>>,
    similarity: Option<Arc<dyn TitleSimilarity>>,
    listeners: Vec<Arc<dyn IndexListener>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            lexical: None,
            embedder: None,
            cross: None,
            similarity: None,
            listeners: Vec::new(),
        }
    }

    /// Replace the built-in FTS5 scorer.
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

    /// Replace the configured built-in title measure.
    #[must_use]
    pub fn with_title_similarity(mut self, similarity: Arc<dyn TitleSimilarity>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn IndexListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Open (or create) a corpus database file and restore the vector index
    /// from its snapshot.
    ///
    /// # Errors
    ///
    /// Invalid configuration, database open/migration failures, a dimension
    /// clash with an existing corpus.
    pub fn open(self, path: &Path) -> Result<Engine> {
        self.config.validate()?;
        let store = Arc::new(SqliteRecordStore::open_with_readers(
            path,
            self.config.index.dimension,
            self.config.index.read_connections,
        )?);
        self.build_sqlite(store)
    }

    /// Engine over a throwaway in-memory SQLite corpus.
    ///
    /// # Errors
    ///
    /// Invalid configuration or migration failures.
    pub fn in_memory(self) -> Result<Engine> {
        self.config.validate()?;
        let store = Arc::new(SqliteRecordStore::in_memory(self.config.index.dimension)?);
        self.build_sqlite(store)
    }

    /// Engine over any record store. No lexical scorer is attached unless
    /// one was supplied, and the vector index is rebuilt from the store.
    ///
    /// # Errors
    ///
    /// Invalid configuration, a store of another dimension, storage errors
    /// while indexing.
    pub fn with_store(self, store: Arc<dyn RecordStore>) -> Result<Engine> {
        self.config.validate()?;
        anyhow::ensure!(
            store.dimension() == self.config.index.dimension,
            CorpusError::CorpusDimensionChanged {
                stored: store.dimension(),
                configured: self.config.index.dimension,
            }
        );
        self.build(store, None)
    }

    fn build_sqlite(mut self, store: Arc<SqliteRecordStore>) -> Result<Engine> {
        if self.lexical.is_none() {
            self.lexical = Some(Arc::new(Fts5Scorer::new(Arc::clone(&store))));
        }
        let durable = DurableVectors::new(store.connection());
        self.build(store, Some(durable))
    }

    fn build(self, store: Arc<dyn RecordStore>, durable: Option<DurableVectors>) -> Result<Engine> {
        let config = self.config;
        let index = Arc::new(VectorIndex::new(config.index.dimension));
        let cache = (config.index.cache_capacity > 0)
            .then(|| Arc::new(SearchCache::new(config.index.cache_capacity)));

        let mut ranker =
            FusionRanker::new(Arc::clone(&index), Arc::clone(&store), config.search.clone());
        if let Some(lexical) = self.lexical {
            ranker = ranker.with_lexical(lexical);
        }
        if let Some(embedder) = &self.embedder {
            ranker = ranker.with_embedder(Arc::clone(embedder));
        }
        if let Some(cross) = self.cross {
            ranker = ranker.with_cross_scorer(cross);
        }

        let mut maintainer = IndexMaintainer::new(
            Arc::clone(&store),
            Arc::clone(&index),
            config.index.write_lock_stripes,
        );
        if let Some(durable) = durable {
            maintainer = maintainer.with_durable(durable);
        }
        if let Some(embedder) = self.embedder {
            maintainer = maintainer.with_embedder(embedder);
        }
        if let Some(cache) = &cache {
            ranker = ranker.with_cache(Arc::clone(cache));
            maintainer = maintainer.with_listener(Arc::clone(cache) as Arc<dyn IndexListener>);
        }
        for listener in self.listeners {
            maintainer = maintainer.with_listener(listener);
        }

        let mut matcher = ConfidenceMatcher::new(config.matching.clone());
        if let Some(similarity) = self.similarity {
            matcher = matcher.with_similarity(similarity);
        }

        maintainer.restore().context("restore vector index")?;

        Ok(Engine {
            config,
            store,
            index,
            ranker,
            matcher,
            maintainer,
        })
    }
}

/// The retrieval and confidence-matching engine over one corpus.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    index: Arc<VectorIndex>,
    ranker: FusionRanker,
    matcher: ConfidenceMatcher,
    maintainer: IndexMaintainer,
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Open a corpus file with the built-in lexical scorer and no embedder.
    ///
    /// # Errors
    ///
    /// See [`EngineBuilder::open`].
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).open(path)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Hybrid search over the corpus.
    ///
    /// # Errors
    ///
    /// See [`FusionRanker::search`].
    #[instrument(skip(self, request), fields(k = request.k))]
    pub fn search(&self, request: &SearchRequest) -> Result<RankedResult, CorpusError> {
        self.ranker.search(request)
    }

    /// Resolve a candidate against `pool`, or against the stored records most
    /// relevant to its title when no pool is given.
    ///
    /// # Errors
    ///
    /// Only while building the default pool: storage errors and
    /// [`CorpusError::RetrievalUnavailable`].
    #[instrument(skip(self, candidate, pool), fields(title = %candidate.title))]
    pub fn resolve(
        &self,
        candidate: &Candidate,
        pool: Option<&[Reference]>,
    ) -> Result<MatchDecision, CorpusError> {
        if let Some(pool) = pool {
            return Ok(self.matcher.resolve(candidate, pool));
        }
        let pool = self.default_pool(candidate)?;
        debug!("resolving against {} stored references", pool.len());
        Ok(self.matcher.resolve(candidate, &pool))
    }

    /// Resolve a candidate against an external catalog. A catalog failure
    /// is treated as an empty pool.
    #[instrument(skip(self, candidate, catalog), fields(title = %candidate.title))]
    pub fn resolve_with_catalog(
        &self,
        candidate: &Candidate,
        catalog: &dyn CatalogLookup,
    ) -> MatchDecision {
        let pool: Vec<Reference> = match catalog.lookup(candidate) {
            Ok(hits) => hits.iter().filter_map(Reference::from_candidate).collect(),
            Err(err) => {
                warn!("catalog lookup failed, treating as no match: {err:#}");
                Vec::new()
            }
        };
        self.matcher.resolve(candidate, &pool)
    }

    /// The stored record carrying the candidate's identifier (as given, then
    /// DOI-normalized) followed by the best title matches.
    fn default_pool(&self, candidate: &Candidate) -> Result<Vec<Reference>, CorpusError> {
        let mut pool = Vec::new();
        if let Some(id) = candidate.id.as_deref() {
            let normalized = normalize_identifier(id);
            for key in [id, normalized.as_str()] {
                if key.is_empty() {
                    continue;
                }
                if let Some(stored) = self.lookup(key)? {
                    debug!(id = %stored.record.id, "candidate identifier is stored");
                    pool.push(Reference::from(&stored));
                    break;
                }
            }
        }

        let request = SearchRequest::text(candidate.title.clone(), self.config.matching.pool_size);
        let result = match self.ranker.search(&request) {
            Ok(result) => result,
            Err(CorpusError::InvalidQuery(_)) => return Ok(pool),
            Err(err) => return Err(err),
        };

        for hit in &result.hits {
            if pool.iter().any(|r| r.id == hit.id) {
                continue;
            }
            if let Some(stored) = self.lookup(&hit.id)? {
                pool.push(Reference::from(&stored));
            }
        }
        Ok(pool)
    }

    fn lookup(&self, id: &str) -> Result<Option<StoredRecord>, CorpusError> {
        match self.store.get(id) {
            Ok(stored) => Ok(Some(stored)),
            Err(CorpusError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Records nearest to `id` by embedding, excluding `id` itself. `n` is
    /// capped at `search.max_results`.
    ///
    /// # Errors
    ///
    /// [`CorpusError::NotFound`] if `id` is not indexed.
    #[instrument(skip(self))]
    pub fn similar(&self, id: &str, n: usize) -> Result<Vec<VectorHit>, CorpusError> {
        let vector = self
            .index
            .vector(id)
            .ok_or_else(|| CorpusError::NotFound(id.to_owned()))?;
        let n = n.min(self.config.search.max_results);
        let mut hits = self.index.query(&vector, n.saturating_add(1))?;
        hits.retain(|hit| hit.id != id);
        hits.truncate(n);
        Ok(hits)
    }

    /// # Errors
    ///
    /// See [`IndexMaintainer::on_record_updated`].
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub fn upsert(&self, record: Record) -> Result<MaintenanceOutcome, CorpusError> {
        self.maintainer.on_record_updated(record)
    }

    /// # Errors
    ///
    /// See [`IndexMaintainer::on_record_added`].
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub fn insert(&self, record: Record) -> Result<MaintenanceOutcome, CorpusError> {
        self.maintainer.on_record_added(record)
    }

    /// # Errors
    ///
    /// Storage errors.
    #[instrument(skip(self))]
    pub fn remove(&self, id: &str) -> Result<MaintenanceOutcome, CorpusError> {
        self.maintainer.on_record_removed(id)
    }

    /// # Errors
    ///
    /// [`CorpusError::NotFound`] if absent.
    pub fn get(&self, id: &str) -> Result<StoredRecord, CorpusError> {
        self.store.get(id)
    }

    /// # Errors
    ///
    /// Storage errors.
    pub fn len(&self) -> Result<usize, CorpusError> {
        self.store.len()
    }

    /// # Errors
    ///
    /// Storage errors.
    pub fn is_empty(&self) -> Result<bool, CorpusError> {
        self.store.is_empty()
    }

    /// # Errors
    ///
    /// Storage errors.
    #[instrument(skip(self))]
    pub fn reconcile(&self) -> Result<ReconcileReport, CorpusError> {
        self.maintainer.reconcile()
    }

    /// # Errors
    ///
    /// Storage errors.
    #[instrument(skip(self, cancel))]
    pub fn reindex(&self, cancel: &CancelFlag) -> Result<ReindexReport, CorpusError> {
        self.maintainer.reindex(cancel)
    }
}
