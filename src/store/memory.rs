//! Process-local vector store with brute-force cosine search.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{cosine_similarity, SearchResult, VectorStore};
use crate::embedder::Embedder;
use crate::embeddings::EmbeddedDocument;
use crate::error::StoreError;

/// Vector store kept in memory; `None` until created.
pub struct InMemoryStore {
    name: String,
    embedder: Arc<dyn Embedder>,
    documents: Mutex<Option<Vec<EmbeddedDocument>>>,
}

impl InMemoryStore {
    /// Creates a store that does not exist yet.
    pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: name.into(),
            embedder,
            documents: Mutex::new(None),
        }
    }

    /// Number of stored documents (0 when not created).
    pub async fn len(&self) -> usize {
        self.documents.lock().await.as_ref().map_or(0, Vec::len)
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of stored documents in insertion order.
    pub async fn documents(&self) -> Vec<EmbeddedDocument> {
        self.documents.lock().await.clone().unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.documents.lock().await.is_some())
    }

    async fn create(&self) -> Result<(), StoreError> {
        self.documents.lock().await.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn recreate(&self) -> Result<(), StoreError> {
        *self.documents.lock().await = Some(Vec::new());
        Ok(())
    }

    async fn insert(&self, documents: &[EmbeddedDocument]) -> Result<usize, StoreError> {
        let mut guard = self.documents.lock().await;
        let Some(stored) = guard.as_mut() else {
            return Err(StoreError::Query {
                store: self.name.clone(),
                message: "store has not been created".into(),
            });
        };
        let width = stored.first().or(documents.first()).map(|doc| doc.embedding.len());
        if let Some(width) = width {
            if let Some(bad) = documents.iter().find(|doc| doc.embedding.len() != width) {
                return Err(StoreError::Rejected {
                    store: self.name.clone(),
                    message: format!(
                        "document {} has {} dimensions, store holds {}",
                        bad.id,
                        bad.embedding.len(),
                        width
                    ),
                });
            }
        }
        for doc in documents {
            match stored.iter_mut().find(|existing| existing.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => stored.push(doc.clone()),
            }
        }
        Ok(documents.len())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|source| StoreError::QueryEmbedding {
                store: self.name.clone(),
                source,
            })?;
        let guard = self.documents.lock().await;
        let Some(stored) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<SearchResult> = stored
            .iter()
            .map(|doc| SearchResult {
                source: self.name.clone(),
                id: doc.id.clone(),
                name: doc.name.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(&vector, &doc.embedding),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
