//! Embedding provider boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EmbeddingError;

pub mod cache;
pub mod openai;

pub use cache::CachingEmbedder;
pub use openai::OpenAiEmbedder;

/// Maps text to a fixed-length vector.
///
/// Implementations must be safe to share across sources; the loader and the
/// stores call them sequentially.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Vector width when known up front.
    fn dimensions(&self) -> Option<usize> {
        None
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }

    fn dimensions(&self) -> Option<usize> {
        (**self).dimensions()
    }
}
