//! News-archive normalization: raw JSON records into typed documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ValidationSkip;

/// Title used when a record has none.
pub const DEFAULT_TITLE: &str = "No Title";

/// Metadata attached to every stored article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Ticker the article was filed under.
    pub stock: String,
    /// Article title (or [`DEFAULT_TITLE`]).
    pub title: String,
    /// Link to the article; empty when unknown.
    pub link: String,
    /// Publication date exactly as the provider reported it.
    pub published_date: String,
    /// Follow-up questions attached by the annotator.
    pub questions: Vec<String>,
    /// Archive the article came from.
    pub source_file: String,
}

/// Article body plus metadata, before identity and embedding are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    /// Text submitted to the embedder.
    pub text: String,
    /// Structured metadata.
    pub metadata: DocumentMetadata,
}

/// A normalized document tagged with its position in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    /// Position of the raw record across the whole archive.
    pub record_index: usize,
    /// The normalized document.
    pub document: NormalizedDocument,
}

/// Outcome of normalizing one archive.
#[derive(Debug, Clone, Default)]
pub struct NormalizedArchive {
    /// Documents that passed validation, in archive order.
    pub documents: Vec<IndexedDocument>,
    /// One entry per skipped collection or record.
    pub skips: Vec<ValidationSkip>,
    /// Raw records seen inside per-stock arrays.
    pub total_records: usize,
    /// Records (not collections) that were skipped.
    pub skipped_records: usize,
}

/// Builds the embedding text for an article.
pub fn document_text(title: &str, description: &str, stock: &str) -> String {
    format!("Title: {title}\n\nDescription: {description}\n\nStock: {stock}")
}

/// Normalizes a single raw record filed under `stock`.
///
/// Missing or wrongly typed fields fall back to defaults; only a record that
/// is not a JSON object is rejected.
pub fn normalize(
    source_label: &str,
    stock: &str,
    raw: &Value,
) -> Result<NormalizedDocument, ValidationSkip> {
    let Some(record) = raw.as_object() else {
        return Err(ValidationSkip::new(
            source_label,
            stock,
            format!("expected an article object, found {}", json_kind(raw)),
        ));
    };

    let title = string_field(record.get("title")).unwrap_or(DEFAULT_TITLE);
    let description = string_field(record.get("description")).unwrap_or_default();
    let link = string_field(record.get("link")).unwrap_or_default();
    let published_date = string_field(record.get("pubDate")).unwrap_or_default();
    let questions = record
        .get("questions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalizedDocument {
        text: document_text(title, description, stock),
        metadata: DocumentMetadata {
            stock: stock.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            published_date: published_date.to_string(),
            questions,
            source_file: source_label.to_string(),
        },
    })
}

/// Normalizes every record of an archive, collecting skips instead of failing.
pub fn normalize_archive(source_label: &str, archive: &Value) -> NormalizedArchive {
    let mut out = NormalizedArchive::default();
    let Some(stocks) = archive.as_object() else {
        let skip = ValidationSkip::new(
            source_label,
            "<root>",
            format!("expected an object keyed by ticker, found {}", json_kind(archive)),
        );
        warn!(source = source_label, "{skip}");
        out.skips.push(skip);
        return out;
    };

    let mut record_index = 0usize;
    for (stock, articles) in stocks {
        let Some(articles) = articles.as_array() else {
            let skip = ValidationSkip::new(
                source_label,
                stock.as_str(),
                format!("expected an array of articles, found {}", json_kind(articles)),
            );
            warn!(source = source_label, "{skip}");
            out.skips.push(skip);
            continue;
        };
        for raw in articles {
            out.total_records += 1;
            match normalize(source_label, stock, raw) {
                Ok(document) => out.documents.push(IndexedDocument {
                    record_index,
                    document,
                }),
                Err(mut skip) => {
                    skip.location = format!("{stock}[{record_index}]");
                    warn!(source = source_label, "{skip}");
                    out.skips.push(skip);
                    out.skipped_records += 1;
                }
            }
            record_index += 1;
        }
    }
    out
}

fn string_field(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
