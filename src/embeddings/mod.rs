//! Vector embeddings for stored terms: the provider seam and the updater
//! that keeps the `terms.embedding` column fresh.

pub mod ollama;
pub mod updater;

use anyhow::Result;

pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};
pub use updater::{EmbeddingStats, EmbeddingUpdater};

/// Anything able to turn a term into a fixed-width vector
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Expected vector width; vectors of any other width are rejected
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Cheap reachability probe run once before a batch
    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
