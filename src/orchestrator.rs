//! Multi-store knowledge base: federated ingestion and search.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::Source;
use crate::embedder::Embedder;
use crate::error::ConfigError;
use crate::loader::{LoadReport, StoreLoader};
use crate::search::federated_search;
use crate::store::{SearchResult, StoreHandle, VectorStore};

/// Sources paired one-to-one with their stores.
pub struct FederatedKnowledgeBase {
    sources: Vec<Source>,
    handles: Vec<StoreHandle>,
    loader: StoreLoader,
}

impl FederatedKnowledgeBase {
    /// Pairs `sources[i]` with `stores[i]`.
    ///
    /// Fails before any I/O when the lists differ in length, are empty, or
    /// when two sources share a label.
    pub fn new(
        sources: Vec<Source>,
        stores: Vec<Arc<dyn VectorStore>>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        if sources.len() != stores.len() {
            return Err(ConfigError::SourceStoreMismatch {
                sources: sources.len(),
                stores: stores.len(),
            });
        }
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.label.as_str()) {
                return Err(ConfigError::DuplicateSource(source.label.clone()));
            }
        }
        let handles = sources
            .iter()
            .zip(stores)
            .map(|(source, store)| StoreHandle::new(source.label.clone(), store))
            .collect();
        Ok(Self {
            sources,
            handles,
            loader: StoreLoader::new(embedder),
        })
    }

    /// Configured sources, in load order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Store handles, index-aligned with [`Self::sources`].
    pub fn handles(&self) -> &[StoreHandle] {
        &self.handles
    }

    /// True when any store does not exist yet (or cannot say).
    pub async fn needs_reload(&self) -> bool {
        for handle in &self.handles {
            match handle.store().exists().await {
                Ok(true) => {}
                Ok(false) => {
                    info!(source = handle.label(), "store missing; full reload required");
                    return true;
                }
                Err(err) => {
                    warn!(source = handle.label(), error = %err, "store existence check failed");
                    return true;
                }
            }
        }
        false
    }

    /// Loads every source into its own store, one after another.
    ///
    /// `recreate` is forced on when any store is missing. A failing source
    /// is reported and the next one still runs.
    pub async fn load_all(&self, recreate: bool) -> Vec<LoadReport> {
        let recreate = recreate || self.needs_reload().await;
        info!(sources = self.sources.len(), recreate, "loading sources");
        let mut reports = Vec::with_capacity(self.sources.len());
        for (index, (source, handle)) in self.sources.iter().zip(&self.handles).enumerate() {
            let report = self
                .loader
                .load(index, source, handle.store(), recreate)
                .await;
            reports.push(report);
        }
        reports
    }

    /// Federated similarity search; see [`federated_search`].
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        federated_search(&self.handles, query, limit).await
    }
}
