//! In-memory LRU of recent query embeddings.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::Embedder;
use crate::error::EmbeddingError;

/// Wraps an embedder and memoizes vectors by exact text.
///
/// Every pgvector store embeds the query itself, so sharing one caching
/// embedder across stores keeps a federated search to one provider call.
pub struct CachingEmbedder<E> {
    inner: E,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl<E: Embedder> CachingEmbedder<E> {
    /// `capacity == 0` disables caching.
    pub fn new(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachingEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let Some(cache) = &self.cache else {
            return self.inner.embed(text).await;
        };
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(text).cloned()
        } {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        cache.lock().await.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn dimensions(&self) -> Option<usize> {
        self.inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Embedder for Counting {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32])
        }
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let embedder = CachingEmbedder::new(Counting(AtomicUsize::new(0)), 4);
        assert_eq!(embedder.embed("meta").await.unwrap(), vec![4.0]);
        assert_eq!(embedder.embed("meta").await.unwrap(), vec![4.0]);
        embedder.embed("nvidia").await.unwrap();
        assert_eq!(embedder.inner.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_capacity_disables_cache() {
        let embedder = CachingEmbedder::new(Counting(AtomicUsize::new(0)), 0);
        embedder.embed("meta").await.unwrap();
        embedder.embed("meta").await.unwrap();
        assert_eq!(embedder.inner.0.load(Ordering::SeqCst), 2);
    }
}
