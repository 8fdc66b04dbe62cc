//! Embedded document records handed to vector stores.

use serde::{Deserialize, Serialize};

use crate::normalizer::DocumentMetadata;

/// A normalized article with its identity and embedding.
///
/// Created by the assigner, immutable afterwards, and owned by the store it
/// is inserted into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    /// `{source_index}_{record_index}_{hash8}`.
    pub id: String,
    /// Display name: the title, or a fallback built from the id.
    pub name: String,
    /// Text that was embedded.
    pub text: String,
    /// Article metadata.
    pub metadata: DocumentMetadata,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}
