//! Vector store boundary and the adapters behind it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddedDocument;
use crate::error::StoreError;
use crate::normalizer::DocumentMetadata;

pub mod memory;
pub mod pgvector;
pub mod table;

pub use memory::InMemoryStore;
pub use self::pgvector::PgVectorStore;
pub use table::TableName;

/// One ranked hit from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Label of the source whose store produced the hit.
    pub source: String,
    /// Document id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Embedded text.
    pub text: String,
    /// Article metadata.
    pub metadata: DocumentMetadata,
    /// Relevance, higher is better. Scales are store specific.
    pub score: f64,
}

/// Persistent collection supporting similarity search over embedded documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name used in logs and errors (usually the table name).
    fn name(&self) -> &str;

    /// Whether the backing collection has been created.
    async fn exists(&self) -> Result<bool, StoreError>;

    /// Creates the backing collection if it is missing.
    async fn create(&self) -> Result<(), StoreError>;

    /// Destroys the backing collection and creates it empty.
    async fn recreate(&self) -> Result<(), StoreError>;

    /// Inserts (or replaces by id) all documents, all or nothing.
    async fn insert(&self, documents: &[EmbeddedDocument]) -> Result<usize, StoreError>;

    /// Returns up to `limit` hits ordered by descending score.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StoreError>;
}

/// Binds a source label to the store that exclusively holds its documents.
#[derive(Clone)]
pub struct StoreHandle {
    label: String,
    store: Arc<dyn VectorStore>,
}

impl StoreHandle {
    /// Pairs a source label with its store.
    pub fn new(label: impl Into<String>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            label: label.into(),
            store,
        }
    }

    /// Source label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Backing store.
    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("label", &self.label)
            .field("store", &self.store.name())
            .finish()
    }
}

/// Cosine similarity; zero when either vector has no magnitude or widths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
