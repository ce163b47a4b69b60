//! Per-identifier write locks.
//!
//! Writers touching the same record identifier must serialize so that the
//! record store and the vector index move together. Writers on different
//! identifiers should not wait on each other. A fixed set of lock stripes
//! gives both: an identifier always hashes to the same stripe, and unrelated
//! identifiers usually land on different ones.
//!
//! Readers never take these locks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::error::CorpusError;

/// Striped mutex set keyed by record identifier.
#[derive(Debug)]
pub struct IdLocks {
    stripes: Vec<Mutex<()>>,
}

/// RAII guard for one identifier's write lock. Released on drop.
#[derive(Debug)]
pub struct IdGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    stripe: usize,
}

impl IdGuard<'_> {
    /// Index of the stripe this guard holds.
    #[must_use]
    pub const fn stripe(&self) -> usize {
        self.stripe
    }
}

impl IdLocks {
    /// Create a lock set with `stripes` independent mutexes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    #[must_use]
    pub fn stripe_for(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripes = self.stripes.len() as u64;
        usize::try_from(hasher.finish() % stripes).unwrap_or(0)
    }

    /// Block until the identifier's stripe is free.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::LockPoisoned`] if a writer panicked while
    /// holding the stripe.
    pub fn acquire(&self, id: &str) -> Result<IdGuard<'_>, CorpusError> {
        let stripe = self.stripe_for(id);
        let guard = self.stripes[stripe]
            .lock()
            .map_err(|_| CorpusError::LockPoisoned("record write lock"))?;
        Ok(IdGuard {
            _guard: guard,
            stripe,
        })
    }
}

impl Default for IdLocks {
    fn default() -> Self {
        Self::new(64)
    }
}
