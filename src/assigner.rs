//! Identity and embedding assignment for normalized documents.

use crc32fast::Hasher as Crc32;

use crate::embedder::Embedder;
use crate::embeddings::EmbeddedDocument;
use crate::error::EmbeddingError;
use crate::normalizer::NormalizedDocument;

/// Eight lowercase hex characters of the CRC32 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Crc32::new();
    hasher.update(text.as_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Stable document id.
///
/// The source index keeps ids unique across stores; the record index and
/// content hash keep them stable across re-runs over unchanged archives.
pub fn document_id(source_index: usize, record_index: usize, text: &str) -> String {
    format!("{source_index}_{record_index}_{}", content_hash(text))
}

/// Title, or `article-{id}` when the title is blank.
pub fn display_name(title: &str, id: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        format!("article-{id}")
    } else {
        title.to_string()
    }
}

/// Assigns an id and embedding to one document.
///
/// An embedder failure is returned for this document only; callers skip it
/// and carry on with the batch.
pub async fn assign<E>(
    source_index: usize,
    record_index: usize,
    doc: NormalizedDocument,
    embedder: &E,
) -> Result<EmbeddedDocument, EmbeddingError>
where
    E: Embedder + ?Sized,
{
    let id = document_id(source_index, record_index, &doc.text);
    let embedding = embedder.embed(&doc.text).await?;
    if embedding.is_empty() {
        return Err(EmbeddingError::EmptyVector);
    }
    if let Some(expected) = embedder.dimensions() {
        if embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
    }
    Ok(EmbeddedDocument {
        name: display_name(&doc.metadata.title, &id),
        id,
        text: doc.text,
        metadata: doc.metadata,
        embedding,
    })
}
