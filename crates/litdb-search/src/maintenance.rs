//! Incremental index maintenance.
//!
//! Keeps the vector index (and its durable snapshot) in step with the record
//! store while searches keep running.
//!
//! Ordering rules:
//! - add/update: the store is written first, then the index. An interruption
//!   can leave a record without an index entry, which [`IndexMaintainer::reconcile`]
//!   repairs, but never an index entry for a record that was never stored.
//! - remove: the index entry goes first, then the record, so no search can
//!   return an identifier whose record is already gone.
//!
//! Writers take the identifier's stripe lock for the whole store+index
//! step; readers never lock.

use litdb_core::error::CorpusError;
use litdb_core::lock::IdLocks;
use litdb_core::model::{Record, StoredRecord};
use litdb_core::store::{PutMode, RecordStore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::cache::{IndexChange, IndexListener};
use crate::semantic::Embedder;
use crate::vector::{DurableVectors, LoadReport, VectorIndex};

/// Cooperative cancellation for long maintenance passes. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MaintenanceOutcome {
    /// Record and index entry written at this generation.
    Indexed { generation: u64 },
    /// Identical content was already stored and indexed.
    Unchanged { generation: u64 },
    Removed,
    /// Removal of an identifier that did not exist.
    Absent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub removed_orphans: usize,
    pub reindexed: usize,
    /// The store's lexical index had drifted and was rebuilt.
    pub lexical_rebuilt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub processed: usize,
    pub skipped_unchanged: usize,
    pub removed_orphans: usize,
    pub cancelled: bool,
}

pub struct IndexMaintainer {
    store: Arc<dyn RecordStore>,
    index: Arc<VectorIndex>,
    durable: Option<DurableVectors>,
    embedder: Option<Arc<dyn Embedder>>,
    locks: IdLocks,
    listeners: Vec<Arc<dyn IndexListener>>,
}

impl IndexMaintainer {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, index: Arc<VectorIndex>, lock_stripes: usize) -> Self {
        Self {
            store,
            index,
            durable: None,
            embedder: None,
            locks: IdLocks::new(lock_stripes),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_durable(mut self, durable: DurableVectors) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Embedder used to fill in records added without an embedding.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn IndexListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Store and index a new record.
    ///
    /// # Errors
    ///
    /// [`CorpusError::Conflict`] if the id exists, vector validation and
    /// embedding errors, storage errors.
    pub fn on_record_added(&self, record: Record) -> Result<MaintenanceOutcome, CorpusError> {
        self.write(record, PutMode::InsertOnly)
    }

    /// Store and index a new or changed record. Identical content is a no-op.
    ///
    /// # Errors
    ///
    /// Vector validation and embedding errors, storage errors.
    pub fn on_record_updated(&self, record: Record) -> Result<MaintenanceOutcome, CorpusError> {
        self.write(record, PutMode::Upsert)
    }

    /// Remove a record and its index entry. Idempotent.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn on_record_removed(&self, id: &str) -> Result<MaintenanceOutcome, CorpusError> {
        let _guard = self.locks.acquire(id)?;
        let was_indexed = self.index.remove(id);
        if let Some(durable) = &self.durable {
            durable.delete(id)?;
        }
        let removed = self.store.remove(id)?;
        if was_indexed || removed {
            self.notify(&IndexChange::Removed { id: id.to_owned() });
        }
        Ok(if removed {
            MaintenanceOutcome::Removed
        } else {
            MaintenanceOutcome::Absent
        })
    }

    /// Load the durable snapshot into the index, then reconcile it with the
    /// store.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn restore(&self) -> Result<(LoadReport, ReconcileReport), CorpusError> {
        let loaded = match &self.durable {
            Some(durable) => durable.load_into(&self.index)?,
            None => LoadReport::default(),
        };
        let reconciled = self.reconcile()?;
        info!(
            "restored vector index: {} loaded, {} skipped, {} orphans removed, {} reindexed",
            loaded.loaded, loaded.skipped, reconciled.removed_orphans, reconciled.reindexed
        );
        Ok((loaded, reconciled))
    }

    /// Drop index entries without a backing record, re-index records whose
    /// entry is missing or stale, and rebuild the store's lexical index if it
    /// no longer matches the records.
    ///
    /// # Errors
    ///
    /// [`CorpusError::LexicalIndexMissing`] if the store's lexical index is
    /// gone, storage errors otherwise.
    pub fn reconcile(&self) -> Result<ReconcileReport, CorpusError> {
        let mut report = ReconcileReport {
            lexical_rebuilt: self.store.repair_lexical_index()?,
            removed_orphans: self.remove_orphans()?,
            reindexed: 0,
        };

        for id in self.store.ids()? {
            let _guard = self.locks.acquire(&id)?;
            let Some(stored) = self.load(&id)? else {
                continue;
            };
            if self.index.generation(&id) == Some(stored.generation) {
                continue;
            }
            if self.apply(&stored)? {
                report.reindexed += 1;
            }
        }

        if report != ReconcileReport::default() {
            info!(
                "reconciled vector index: {} orphans removed, {} reindexed, lexical rebuilt: {}",
                report.removed_orphans, report.reindexed, report.lexical_rebuilt
            );
        }
        Ok(report)
    }

    /// Re-index the whole corpus one identifier at a time.
    ///
    /// Each identifier is committed before the next is read; after a cancel
    /// the work done so far stays in place and orphans are left for the next
    /// reconcile.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn reindex(&self, cancel: &CancelFlag) -> Result<ReindexReport, CorpusError> {
        let mut report = ReindexReport::default();
        for id in self.store.ids()? {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let _guard = self.locks.acquire(&id)?;
            let Some(stored) = self.load(&id)? else {
                continue;
            };
            if self.apply(&stored)? {
                report.processed += 1;
            } else {
                report.skipped_unchanged += 1;
            }
        }

        if !report.cancelled {
            report.removed_orphans = self.remove_orphans()?;
        }
        info!(
            "reindex {}: {} processed, {} unchanged, {} orphans removed",
            if report.cancelled { "cancelled" } else { "complete" },
            report.processed,
            report.skipped_unchanged,
            report.removed_orphans
        );
        Ok(report)
    }

    fn write(&self, record: Record, mode: PutMode) -> Result<MaintenanceOutcome, CorpusError> {
        let record = self.fill_embedding(record)?;
        let id = record.id.clone();
        let vector = record.embedding.clone();

        let _guard = self.locks.acquire(&id)?;
        let outcome = self.store.put(record, mode)?;
        let generation = outcome.generation();

        // An unchanged record may still lack an entry after an interrupted
        // earlier write.
        if self.index.upsert(&id, &vector, generation)? {
            if let Some(durable) = &self.durable {
                durable.save(&id, generation, &vector)?;
            }
            self.notify(&IndexChange::Upserted {
                id: id.clone(),
                generation,
            });
            return Ok(MaintenanceOutcome::Indexed { generation });
        }

        if outcome.changed() {
            Ok(MaintenanceOutcome::Indexed { generation })
        } else {
            debug!(id = %id, "record unchanged; index untouched");
            Ok(MaintenanceOutcome::Unchanged { generation })
        }
    }

    fn fill_embedding(&self, mut record: Record) -> Result<Record, CorpusError> {
        if !record.embedding.is_empty() {
            return Ok(record);
        }
        let Some(embedder) = &self.embedder else {
            return Err(CorpusError::InvalidVector {
                id: record.id,
                reason: "empty embedding and no embedder configured".into(),
            });
        };
        record.embedding = embedder
            .embed(&record.content())
            .map_err(|err| CorpusError::Embedding {
                id: record.id.clone(),
                reason: format!("{err:#}"),
            })?;
        Ok(record)
    }

    /// Caller holds the id lock.
    fn load(&self, id: &str) -> Result<Option<StoredRecord>, CorpusError> {
        match self.store.get(id) {
            Ok(stored) => Ok(Some(stored)),
            Err(CorpusError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Caller holds the id lock. Returns `true` if the index changed.
    fn apply(&self, stored: &StoredRecord) -> Result<bool, CorpusError> {
        let id = &stored.record.id;
        let changed = self
            .index
            .upsert(id, &stored.record.embedding, stored.generation)?;
        if changed {
            if let Some(durable) = &self.durable {
                durable.save(id, stored.generation, &stored.record.embedding)?;
            }
            self.notify(&IndexChange::Upserted {
                id: id.clone(),
                generation: stored.generation,
            });
        }
        Ok(changed)
    }

    fn remove_orphans(&self) -> Result<usize, CorpusError> {
        let mut candidates: BTreeSet<String> = self.index.ids().into_iter().collect();
        if let Some(durable) = &self.durable {
            candidates.extend(durable.ids()?);
        }

        let mut removed = 0;
        for id in candidates {
            let _guard = self.locks.acquire(&id)?;
            if self.store.contains(&id)? {
                continue;
            }
            let was_indexed = self.index.remove(&id);
            let was_saved = match &self.durable {
                Some(durable) => durable.delete(&id)?,
                None => false,
            };
            if was_indexed || was_saved {
                removed += 1;
                self.notify(&IndexChange::Removed { id });
            }
        }
        Ok(removed)
    }

    fn notify(&self, change: &IndexChange) {
        for listener in &self.listeners {
            listener.on_index_change(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litdb_core::store::MemoryRecordStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IndexChange>>);

    impl IndexListener for Recorder {
        fn on_index_change(&self, change: &IndexChange) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(change.clone());
            }
        }
    }

    fn setup() -> (Arc<MemoryRecordStore>, Arc<VectorIndex>, Arc<Recorder>, IndexMaintainer) {
        let store = Arc::new(MemoryRecordStore::new(2));
        let index = Arc::new(VectorIndex::new(2));
        let recorder = Arc::new(Recorder::default());
        let records: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;
        let maintainer = IndexMaintainer::new(records, Arc::clone(&index), 8)
            .with_listener(Arc::clone(&recorder) as Arc<dyn IndexListener>);
        (store, index, recorder, maintainer)
    }

    fn record(id: &str, vector: [f32; 2]) -> Record {
        Record::new(id, format!("title {id}")).with_embedding(vector.to_vec())
    }

    #[test]
    fn upsert_is_idempotent() {
        let (_store, index, recorder, maintainer) = setup();
        let first = maintainer
            .on_record_updated(record("a", [1.0, 0.0]))
            .expect("first");
        let second = maintainer
            .on_record_updated(record("a", [1.0, 0.0]))
            .expect("second");

        assert_eq!(first, MaintenanceOutcome::Indexed { generation: 1 });
        assert_eq!(second, MaintenanceOutcome::Unchanged { generation: 1 });
        assert_eq!(index.len(), 1);
        assert_eq!(recorder.0.lock().expect("lock").len(), 1);
    }

    #[test]
    fn update_bumps_generation_and_replaces_vector() {
        let (_store, index, _recorder, maintainer) = setup();
        maintainer.on_record_updated(record("a", [1.0, 0.0])).expect("v1");
        let outcome = maintainer
            .on_record_updated(record("a", [0.0, 1.0]))
            .expect("v2");
        assert_eq!(outcome, MaintenanceOutcome::Indexed { generation: 2 });
        assert_eq!(index.vector("a"), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn add_conflicts_on_existing_id() {
        let (_store, _index, _recorder, maintainer) = setup();
        maintainer.on_record_added(record("a", [1.0, 0.0])).expect("add");
        let err = maintainer
            .on_record_added(record("a", [0.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, CorpusError::Conflict(_)));
    }

    #[test]
    fn wrong_dimension_leaves_store_and_index_untouched() {
        let (store, index, _recorder, maintainer) = setup();
        let bad = Record::new("a", "t").with_embedding(vec![1.0, 0.0, 0.0]);
        assert!(maintainer.on_record_updated(bad).is_err());
        assert!(!store.contains("a").expect("contains"));
        assert!(index.is_empty());
    }

    #[test]
    fn remove_is_idempotent_and_drops_entry() {
        let (store, index, _recorder, maintainer) = setup();
        maintainer.on_record_updated(record("a", [1.0, 0.0])).expect("add");
        assert_eq!(
            maintainer.on_record_removed("a").expect("remove"),
            MaintenanceOutcome::Removed
        );
        assert_eq!(
            maintainer.on_record_removed("a").expect("remove again"),
            MaintenanceOutcome::Absent
        );
        assert!(!index.contains("a"));
        assert!(!store.contains("a").expect("contains"));
    }

    #[test]
    fn missing_embedding_is_filled_by_embedder() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new(2));
        let index = Arc::new(VectorIndex::new(2));
        let embedder = |text: &str| -> anyhow::Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        };
        let maintainer = IndexMaintainer::new(store, Arc::clone(&index), 4)
            .with_embedder(Arc::new(embedder));

        maintainer
            .on_record_added(Record::new("a", "abc"))
            .expect("add");
        assert_eq!(index.vector("a"), Some(vec![3.0, 1.0]));
    }

    #[test]
    fn missing_embedding_without_embedder_is_invalid() {
        let (store, index, recorder, maintainer) = setup();
        let err = maintainer
            .on_record_added(Record::new("a", "no vector yet"))
            .unwrap_err();
        assert!(
            matches!(&err, CorpusError::InvalidVector { id, reason } if id == "a" && reason.contains("no embedder")),
            "got {err:?}"
        );
        assert!(!store.contains("a").expect("contains"));
        assert!(index.is_empty());
        assert!(recorder.0.lock().expect("lock").is_empty());
    }

    #[test]
    fn embedder_failure_is_reported_as_embedding_error() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new(2));
        let index = Arc::new(VectorIndex::new(2));
        let embedder =
            |_: &str| -> anyhow::Result<Vec<f32>> { anyhow::bail!("model not loaded") };
        let maintainer = IndexMaintainer::new(store, Arc::clone(&index), 4)
            .with_embedder(Arc::new(embedder));

        let err = maintainer.on_record_updated(Record::new("a", "abc")).unwrap_err();
        assert!(matches!(err, CorpusError::Embedding { .. }));
        assert!(err.is_recoverable());
        assert!(index.is_empty());
    }

    #[test]
    fn reconcile_repairs_orphans_and_stale_entries() {
        let (store, index, _recorder, maintainer) = setup();
        maintainer.on_record_updated(record("a", [1.0, 0.0])).expect("a");
        maintainer.on_record_updated(record("b", [0.0, 1.0])).expect("b");

        // Out-of-band edits: an orphan entry and a store write the index missed.
        index.upsert("ghost", &[1.0, 1.0], 1).expect("ghost");
        store
            .put(record("b", [0.5, 0.5]), PutMode::Upsert)
            .expect("edit b");
        store.put(record("c", [1.0, 1.0]), PutMode::Upsert).expect("c");

        let report = maintainer.reconcile().expect("reconcile");
        assert_eq!(
            report,
            ReconcileReport {
                removed_orphans: 1,
                reindexed: 2,
                lexical_rebuilt: false,
            }
        );
        assert_eq!(index.ids(), vec!["a", "b", "c"]);
        assert_eq!(index.generation("b"), Some(2));

        assert_eq!(maintainer.reconcile().expect("again"), ReconcileReport::default());
    }

    #[test]
    fn cancelled_reindex_reports_partial_progress() {
        let (store, _index, _recorder, maintainer) = setup();
        store.put(record("a", [1.0, 0.0]), PutMode::Upsert).expect("a");

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = maintainer.reindex(&cancel).expect("reindex");
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);

        let report = maintainer.reindex(&CancelFlag::new()).expect("reindex");
        assert_eq!(report.processed, 1);
        assert!(!report.cancelled);

        let report = maintainer.reindex(&CancelFlag::new()).expect("reindex");
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped_unchanged, 1);
    }
}
