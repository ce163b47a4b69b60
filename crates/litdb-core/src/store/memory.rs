use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{PutMode, PutOutcome, RecordStore, plan_put};
use crate::error::CorpusError;
use crate::model::{Record, StoredRecord};

/// In-process record store backed by a sharded map.
///
/// The entry API holds the shard lock for the whole read-decide-write step,
/// so concurrent writers on one identifier serialize while writers on other
/// shards proceed.
#[derive(Debug)]
pub struct MemoryRecordStore {
    dimension: usize,
    records: DashMap<String, StoredRecord>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: DashMap::new(),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn put(&self, record: Record, mode: PutMode) -> Result<PutOutcome, CorpusError> {
        record.validate_embedding(self.dimension)?;
        let content_hash = record.content_hash();

        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                let outcome = plan_put(
                    &record.id,
                    Some((current.content_hash.as_str(), current.generation)),
                    &content_hash,
                    mode,
                )?;
                if outcome.changed() {
                    slot.insert(StoredRecord {
                        record,
                        generation: outcome.generation(),
                        content_hash,
                    });
                }
                Ok(outcome)
            }
            Entry::Vacant(slot) => {
                let outcome = plan_put(&record.id, None, &content_hash, mode)?;
                slot.insert(StoredRecord {
                    record,
                    generation: outcome.generation(),
                    content_hash,
                });
                Ok(outcome)
            }
        }
    }

    fn get(&self, id: &str) -> Result<StoredRecord, CorpusError> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CorpusError::NotFound(id.to_owned()))
    }

    fn remove(&self, id: &str) -> Result<bool, CorpusError> {
        Ok(self.records.remove(id).is_some())
    }

    fn contains(&self, id: &str) -> Result<bool, CorpusError> {
        Ok(self.records.contains_key(id))
    }

    fn ids(&self) -> Result<Vec<String>, CorpusError> {
        let mut ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn len(&self) -> Result<usize, CorpusError> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> Record {
        Record::new(id, title).with_embedding(vec![1.0, 0.0, 0.0])
    }

    #[test]
    fn put_get_roundtrip_and_generations() {
        let store = MemoryRecordStore::new(3);
        let first = store.put(record("a", "One"), PutMode::Upsert).expect("insert");
        assert_eq!(first, PutOutcome::Inserted { generation: 1 });

        let same = store.put(record("a", "One"), PutMode::Upsert).expect("same");
        assert_eq!(same, PutOutcome::Unchanged { generation: 1 });

        let changed = store.put(record("a", "Two"), PutMode::Upsert).expect("update");
        assert_eq!(changed, PutOutcome::Updated { generation: 2 });

        let stored = store.get("a").expect("get");
        assert_eq!(stored.record.title, "Two");
        assert_eq!(stored.generation, 2);
    }

    #[test]
    fn insert_only_conflicts_on_existing_id() {
        let store = MemoryRecordStore::new(3);
        store.put(record("a", "One"), PutMode::InsertOnly).expect("insert");
        let err = store
            .put(record("a", "Other"), PutMode::InsertOnly)
            .unwrap_err();
        assert!(matches!(err, CorpusError::Conflict(_)));
        assert_eq!(store.get("a").expect("get").record.title, "One");
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryRecordStore::new(3);
        store.put(record("a", "One"), PutMode::Upsert).expect("insert");
        assert!(store.remove("a").expect("remove"));
        assert!(!store.remove("a").expect("second remove"));
        assert!(matches!(store.get("a"), Err(CorpusError::NotFound(_))));
    }

    #[test]
    fn wrong_dimension_is_rejected_without_side_effects() {
        let store = MemoryRecordStore::new(3);
        let bad = Record::new("a", "One").with_embedding(vec![1.0]);
        assert!(matches!(
            store.put(bad, PutMode::Upsert),
            Err(CorpusError::DimensionMismatch { .. })
        ));
        assert!(store.is_empty().expect("len"));
    }

    #[test]
    fn ids_are_sorted() {
        let store = MemoryRecordStore::new(3);
        for id in ["c", "a", "b"] {
            store.put(record(id, id), PutMode::Upsert).expect("insert");
        }
        assert_eq!(store.ids().expect("ids"), vec!["a", "b", "c"]);
    }
}
