//! Embedding capability.
//!
//! The embedding model lives outside the engine. Queries that arrive as text
//! only are embedded through [`Embedder`]; records added without an
//! embedding are filled in the same way during index maintenance.

use anyhow::Result;

/// External embedding-generation capability.
///
/// The returned vector must have the corpus dimension; anything else is
/// treated as a failure of the vector signal.
pub trait Embedder: Send + Sync {
    /// # Errors
    ///
    /// Any model or runtime failure.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self(text)
    }
}
