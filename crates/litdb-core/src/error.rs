use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    RecordNotFound,
    RecordConflict,
    DimensionMismatch,
    InvalidVector,
    InvalidQuery,
    CorpusDimensionChanged,
    StorageFailure,
    LockPoisoned,
    RetrievalUnavailable,
    LexicalIndexMissing,
    EmbeddingFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidConfig => "E1004",
            Self::RecordNotFound => "E2001",
            Self::RecordConflict => "E2002",
            Self::DimensionMismatch => "E2003",
            Self::InvalidVector => "E2004",
            Self::InvalidQuery => "E2005",
            Self::CorpusDimensionChanged => "E3001",
            Self::StorageFailure => "E5001",
            Self::LockPoisoned => "E5002",
            Self::RetrievalUnavailable => "E6001",
            Self::LexicalIndexMissing => "E6002",
            Self::EmbeddingFailed => "E6003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Config value out of range",
            Self::RecordNotFound => "Record not found",
            Self::RecordConflict => "Record already exists",
            Self::DimensionMismatch => "Embedding dimension mismatch",
            Self::InvalidVector => "Embedding contains non-finite values",
            Self::InvalidQuery => "Invalid search request",
            Self::CorpusDimensionChanged => "Corpus dimension differs from configuration",
            Self::StorageFailure => "Corpus database failure",
            Self::LockPoisoned => "Corpus lock poisoned",
            Self::RetrievalUnavailable => "Lexical and vector retrieval both unavailable",
            Self::LexicalIndexMissing => "FTS index missing",
            Self::EmbeddingFailed => "Embedder failed to produce a vector",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the litdb config file and retry."),
            Self::InvalidConfig => {
                Some("Weights must be non-negative and thresholds must lie in [0, 1].")
            }
            Self::RecordNotFound | Self::RecordConflict => None,
            Self::DimensionMismatch => {
                Some("Re-embed the record with the model configured for this corpus.")
            }
            Self::InvalidVector => Some("Check the embedding model output for NaN or inf."),
            Self::InvalidQuery => Some("Provide query text, a query vector, or both."),
            Self::CorpusDimensionChanged => {
                Some("Use the original embedding dimension or build a new corpus database.")
            }
            Self::StorageFailure => Some("Check disk space and write permissions."),
            Self::LockPoisoned => Some("A writer panicked; restart the process."),
            Self::RetrievalUnavailable => {
                Some("Retry later; check the lexical index and embedding model.")
            }
            Self::LexicalIndexMissing => {
                Some("Restore the corpus database from a backup or rebuild it.")
            }
            Self::EmbeddingFailed => Some("Supply the embedding with the record or retry later."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised by the record store, the vector index and the search engine.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// The identifier is absent. Recoverable; the caller decides.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Insert-only write hit an existing identifier.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// A vector's length disagrees with the corpus dimension.
    #[error("embedding dimension mismatch for {id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// A vector contains NaN or infinite components.
    #[error("invalid embedding for {id}: {reason}")]
    InvalidVector { id: String, reason: String },

    /// The search request cannot be served as given.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Both ranking signals failed.
    #[error("retrieval unavailable (lexical: {lexical}; vector: {vector})")]
    RetrievalUnavailable { lexical: String, vector: String },

    /// The database was created for a different embedding dimension.
    #[error("corpus was created with dimension {stored}, configured dimension is {configured}")]
    CorpusDimensionChanged { stored: usize, configured: usize },

    /// The FTS5 table backing lexical search is absent from the database.
    #[error("lexical index missing from corpus database")]
    LexicalIndexMissing,

    /// The configured embedder could not embed a record's content.
    #[error("embedding failed for {id}: {reason}")]
    Embedding { id: String, reason: String },

    #[error("corpus database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corpus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corpus lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl CorpusError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::RecordNotFound,
            Self::Conflict(_) => ErrorCode::RecordConflict,
            Self::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            Self::InvalidVector { .. } => ErrorCode::InvalidVector,
            Self::InvalidQuery(_) => ErrorCode::InvalidQuery,
            Self::RetrievalUnavailable { .. } => ErrorCode::RetrievalUnavailable,
            Self::CorpusDimensionChanged { .. } => ErrorCode::CorpusDimensionChanged,
            Self::LexicalIndexMissing => ErrorCode::LexicalIndexMissing,
            Self::Embedding { .. } => ErrorCode::EmbeddingFailed,
            Self::Storage(_) | Self::Serialization(_) => ErrorCode::StorageFailure,
            Self::LockPoisoned(_) => ErrorCode::LockPoisoned,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// `true` for errors the caller is expected to handle as a normal outcome.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Conflict(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidVector { .. }
                | Self::InvalidQuery(_)
                | Self::RetrievalUnavailable { .. }
                | Self::Embedding { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{CorpusError, ErrorCode};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::InvalidConfig,
            ErrorCode::RecordNotFound,
            ErrorCode::RecordConflict,
            ErrorCode::DimensionMismatch,
            ErrorCode::InvalidVector,
            ErrorCode::InvalidQuery,
            ErrorCode::CorpusDimensionChanged,
            ErrorCode::StorageFailure,
            ErrorCode::LockPoisoned,
            ErrorCode::RetrievalUnavailable,
            ErrorCode::LexicalIndexMissing,
            ErrorCode::EmbeddingFailed,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::DimensionMismatch.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn dimension_mismatch_message_names_both_sizes() {
        let err = CorpusError::DimensionMismatch {
            id: "10.1000/xyz".into(),
            expected: 384,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("got 3"));
        assert_eq!(err.code(), ErrorCode::DimensionMismatch);
        assert!(err.is_recoverable());
    }

    #[test]
    fn storage_errors_are_not_recoverable() {
        let err = CorpusError::LockPoisoned("records");
        assert_eq!(err.code(), ErrorCode::LockPoisoned);
        assert!(!err.is_recoverable());
        assert!(err.hint().is_some());

        let err = CorpusError::LexicalIndexMissing;
        assert_eq!(err.code().code(), "E6002");
        assert!(!err.is_recoverable());
    }
}
