//! Bibliographic records as stored in the corpus, and transient candidates
//! observed outside it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CorpusError;

/// A bibliographic record owned by the record store.
///
/// `id` is a stable DOI-like key unique within a store. `embedding` has the
/// corpus-wide dimension and is replaced together with the record whenever
/// the text changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Free-form content indexed for lexical search.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    #[must_use]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Text handed to the embedder and the cross scorer: title followed by
    /// the body when one exists.
    #[must_use]
    pub fn content(&self) -> String {
        let body = self.text.trim();
        if body.is_empty() {
            self.title.trim().to_owned()
        } else {
            format!("{} {}", self.title.trim(), body)
        }
    }

    /// SHA-256 over every field that affects ranking or matching.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        if let Some(year) = self.year {
            hasher.update(year.to_le_bytes());
        }
        hasher.update([0]);
        for author in &self.authors {
            hasher.update(author.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0]);
        hasher.update(self.text.as_bytes());
        hasher.update([0]);
        for value in &self.embedding {
            hasher.update(value.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Check the embedding against the corpus dimension.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::DimensionMismatch`] or
    /// [`CorpusError::InvalidVector`].
    pub fn validate_embedding(&self, dimension: usize) -> Result<(), CorpusError> {
        validate_vector(&self.id, &self.embedding, dimension)
    }
}

/// Shared dimension and finiteness check for stored and queried vectors.
///
/// # Errors
///
/// Returns [`CorpusError::DimensionMismatch`] when the length is wrong and
/// [`CorpusError::InvalidVector`] when a component is NaN or infinite.
pub fn validate_vector(id: &str, vector: &[f32], dimension: usize) -> Result<(), CorpusError> {
    if vector.len() != dimension {
        return Err(CorpusError::DimensionMismatch {
            id: id.to_owned(),
            expected: dimension,
            actual: vector.len(),
        });
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(CorpusError::InvalidVector {
            id: id.to_owned(),
            reason: format!("component {pos} is not finite"),
        });
    }
    Ok(())
}

/// A record together with its store-assigned version marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: Record,
    /// Starts at 1 and increases whenever the content hash changes.
    pub generation: u64,
    pub content_hash: String,
}

/// A not-yet-stored record: a parsed reference or an external catalog hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Candidate {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Relevance reported by the source that produced the candidate.
    #[serde(default)]
    pub external_score: Option<f32>,
}

impl Candidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
}

impl From<&Record> for Candidate {
    fn from(record: &Record) -> Self {
        Self {
            id: Some(record.id.clone()),
            title: record.title.clone(),
            year: record.year,
            authors: record.authors.clone(),
            external_score: None,
        }
    }
}

/// Canonical form of a DOI-like identifier for equality checks.
///
/// Lowercases and strips resolver prefixes, so `https://doi.org/10.1/ABC`
/// and `doi:10.1/abc` compare equal.
#[must_use]
pub fn normalize_identifier(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(rest) = lowered.strip_prefix(prefix) {
            return rest.trim().to_owned();
        }
    }
    lowered
}
