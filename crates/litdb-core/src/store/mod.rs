//! Record store: the durable owner of record content and embeddings.
//!
//! Two implementations share one contract:
//!
//! - [`MemoryRecordStore`] keeps records in a sharded concurrent map
//! - [`SqliteRecordStore`] persists them in the corpus database, with FTS5
//!   mirroring maintained by triggers
//!
//! Every write is atomic for its identifier. Writing identical content is a
//! no-op that keeps the current generation.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use crate::error::CorpusError;
use crate::model::{Record, StoredRecord};

/// How `put` treats an identifier that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Insert or replace.
    #[default]
    Upsert,
    /// Fail with [`CorpusError::Conflict`] if the identifier exists.
    InsertOnly,
}

/// Result of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted { generation: u64 },
    Updated { generation: u64 },
    /// Content hash matched the stored record; nothing was written.
    Unchanged { generation: u64 },
}

impl PutOutcome {
    #[must_use]
    pub const fn generation(self) -> u64 {
        match self {
            Self::Inserted { generation }
            | Self::Updated { generation }
            | Self::Unchanged { generation } => generation,
        }
    }

    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

pub trait RecordStore: Send + Sync {
    /// Embedding dimension every record in this store must have.
    fn dimension(&self) -> usize;

    /// Insert or replace a record by identifier.
    ///
    /// # Errors
    ///
    /// [`CorpusError::Conflict`] for an existing id under
    /// [`PutMode::InsertOnly`], dimension/finiteness errors for a bad
    /// embedding, storage errors otherwise.
    fn put(&self, record: Record, mode: PutMode) -> Result<PutOutcome, CorpusError>;

    /// # Errors
    ///
    /// [`CorpusError::NotFound`] if the id is absent.
    fn get(&self, id: &str) -> Result<StoredRecord, CorpusError>;

    /// Remove a record. Returns `false` when it was already absent.
    ///
    /// # Errors
    ///
    /// Storage errors only; an absent id is not an error.
    fn remove(&self, id: &str) -> Result<bool, CorpusError>;

    /// # Errors
    ///
    /// Storage errors.
    fn contains(&self, id: &str) -> Result<bool, CorpusError>;

    /// All identifiers in ascending order.
    ///
    /// # Errors
    ///
    /// Storage errors.
    fn ids(&self) -> Result<Vec<String>, CorpusError>;

    /// # Errors
    ///
    /// Storage errors.
    fn len(&self) -> Result<usize, CorpusError>;

    /// # Errors
    ///
    /// Storage errors.
    fn is_empty(&self) -> Result<bool, CorpusError> {
        Ok(self.len()? == 0)
    }

    /// Bring the store's lexical index back in line with its records.
    /// Returns `true` when a rebuild was needed. Stores without a lexical
    /// index have nothing to repair.
    ///
    /// # Errors
    ///
    /// [`CorpusError::LexicalIndexMissing`] if the index is gone entirely,
    /// storage errors otherwise.
    fn repair_lexical_index(&self) -> Result<bool, CorpusError> {
        Ok(false)
    }
}

/// Shared decision for both stores: given the stored state (if any) and the
/// new content hash, decide what to write.
pub(crate) fn plan_put(
    id: &str,
    existing: Option<(&str, u64)>,
    new_hash: &str,
    mode: PutMode,
) -> Result<PutOutcome, CorpusError> {
    match existing {
        Some(_) if mode == PutMode::InsertOnly => Err(CorpusError::Conflict(id.to_owned())),
        Some((hash, generation)) if hash == new_hash => Ok(PutOutcome::Unchanged { generation }),
        Some((_, generation)) => Ok(PutOutcome::Updated {
            generation: generation + 1,
        }),
        None => Ok(PutOutcome::Inserted { generation: 1 }),
    }
}
