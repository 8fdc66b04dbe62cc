//! Per-source store loading: read, normalize, embed, bulk insert.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{read_archive, Source};
use crate::assigner::{assign, document_id};
use crate::embedder::Embedder;
use crate::error::LoadStage;
use crate::normalizer::normalize_archive;
use crate::store::VectorStore;

/// One problem recorded while loading a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadIssue {
    /// Stage the problem occurred at.
    pub stage: LoadStage,
    /// What went wrong.
    pub message: String,
}

/// Outcome of loading one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Source label.
    pub source: String,
    /// Raw records seen in the archive.
    pub attempted: usize,
    /// Documents the store accepted.
    pub inserted: usize,
    /// Problems in the order they were hit.
    pub errors: Vec<LoadIssue>,
}

impl LoadReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            attempted: 0,
            inserted: 0,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, stage: LoadStage, message: impl Into<String>) {
        self.errors.push(LoadIssue {
            stage,
            message: message.into(),
        });
    }

    /// True when the source as a whole failed (read, prepare or insert).
    pub fn failed(&self) -> bool {
        self.errors.iter().any(|issue| {
            matches!(
                issue.stage,
                LoadStage::Read | LoadStage::Prepare | LoadStage::Insert
            )
        })
    }

    /// Number of issues recorded at `stage`.
    pub fn count(&self, stage: LoadStage) -> usize {
        self.errors.iter().filter(|issue| issue.stage == stage).count()
    }
}

/// Loads sources into their stores with a shared embedder.
#[derive(Clone)]
pub struct StoreLoader {
    embedder: Arc<dyn Embedder>,
}

impl StoreLoader {
    /// Builds a loader around `embedder`.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Loads one source into `store`.
    ///
    /// Record-level failures are recorded and skipped. A store failure on
    /// prepare or insert fails the whole source: nothing from this batch is
    /// kept.
    pub async fn load(
        &self,
        source_index: usize,
        source: &Source,
        store: &dyn VectorStore,
        recreate: bool,
    ) -> LoadReport {
        let mut report = LoadReport::new(&source.label);

        let archive = match read_archive(&source.path) {
            Ok(value) => value,
            Err(err) => {
                warn!(source = %source.label, error = %format!("{err:#}"), "archive unreadable");
                report.record(LoadStage::Read, format!("{err:#}"));
                return report;
            }
        };

        let prepared = if recreate {
            store.recreate().await
        } else {
            store.create().await
        };
        if let Err(err) = prepared {
            warn!(
                source = %source.label,
                store = store.name(),
                error = %err,
                "store prepare failed"
            );
            report.record(LoadStage::Prepare, err.to_string());
            return report;
        }

        let normalized = normalize_archive(&source.file_name(), &archive);
        report.attempted = normalized.total_records;
        for skip in &normalized.skips {
            report.record(LoadStage::Normalize, skip.to_string());
        }

        let mut documents = Vec::with_capacity(normalized.documents.len());
        for indexed in normalized.documents {
            let id = document_id(source_index, indexed.record_index, &indexed.document.text);
            match assign(
                source_index,
                indexed.record_index,
                indexed.document,
                self.embedder.as_ref(),
            )
            .await
            {
                Ok(doc) => documents.push(doc),
                Err(err) => {
                    warn!(source = %source.label, id = %id, error = %err, "embedding failed");
                    report.record(LoadStage::Embed, format!("{id}: {err}"));
                }
            }
        }

        match store.insert(&documents).await {
            Ok(count) => report.inserted = count,
            Err(err) => {
                warn!(
                    source = %source.label,
                    store = store.name(),
                    error = %err,
                    "bulk insert failed"
                );
                report.record(LoadStage::Insert, err.to_string());
            }
        }

        info!(
            source = %source.label,
            attempted = report.attempted,
            inserted = report.inserted,
            issues = report.errors.len(),
            "source loaded"
        );
        report
    }
}
