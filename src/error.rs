//! Error taxonomy shared by ingestion and search.
//!
//! Record-level problems (`ValidationSkip`, `EmbeddingError`) and source-level
//! problems (`StoreError`) are contained and reported; only `ConfigError`
//! aborts an operation outright.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A raw collection or record that was skipped during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("skipped {location}: {reason}")]
pub struct ValidationSkip {
    /// Source label the skipped value belongs to.
    pub source_label: String,
    /// Human readable position, e.g. `AAPL[3]` or `AAPL`.
    pub location: String,
    /// Why the value could not be used.
    pub reason: String,
}

impl ValidationSkip {
    /// Builds a skip entry.
    pub fn new(
        source_label: impl Into<String>,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_label: source_label.into(),
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to produce an embedding for a single text.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Request never produced a response (connect, timeout, body).
    #[error("embedding transport error: {0}")]
    Transport(String),

    /// Provider answered with a non-success status after retries.
    #[error("embedding provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Provider answered with a payload we could not use.
    #[error("malformed embedding response: {0}")]
    Malformed(String),

    /// Provider returned an empty vector.
    #[error("embedding provider returned an empty vector")]
    EmptyVector,

    /// Vector length differs from the configured dimension.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Returned dimension.
        actual: usize,
    },
}

/// Failure reported by a vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or driver level failure.
    #[error("store `{store}` connection error: {message}")]
    Connection {
        /// Store name.
        store: String,
        /// Driver message.
        message: String,
    },

    /// Statement rejected by the backend.
    #[error("store `{store}` query failed: {message}")]
    Query {
        /// Store name.
        store: String,
        /// Backend message.
        message: String,
    },

    /// Query text could not be embedded for a similarity search.
    #[error("store `{store}` could not embed query: {source}")]
    QueryEmbedding {
        /// Store name.
        store: String,
        /// Underlying embedding failure.
        #[source]
        source: EmbeddingError,
    },

    /// Documents do not fit the store's schema (e.g. vector width).
    #[error("store `{store}` rejected documents: {message}")]
    Rejected {
        /// Store name.
        store: String,
        /// Reason.
        message: String,
    },
}

/// Invalid wiring detected before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Source and store lists differ in length.
    #[error("{sources} source(s) configured but {stores} store(s) supplied")]
    SourceStoreMismatch {
        /// Number of sources.
        sources: usize,
        /// Number of stores.
        stores: usize,
    },

    /// No sources configured.
    #[error("at least one source is required")]
    NoSources,

    /// Two sources share a label.
    #[error("duplicate source label `{0}`")]
    DuplicateSource(String),

    /// Two source labels reduce to the same backing table.
    #[error("sources `{first}` and `{second}` would both be stored in table `{table}`")]
    TableCollision {
        /// Table both labels map to.
        table: String,
        /// Label seen first.
        first: String,
        /// Label seen second.
        second: String,
    },

    /// A `--source` flag could not be parsed.
    #[error("invalid source spec `{0}`; expected LABEL=PATH")]
    InvalidSourceSpec(String),

    /// A required secret is missing and could not be prompted for.
    #[error("missing secret {0}")]
    MissingSecret(String),

    /// Any other rejected setting.
    #[error("invalid setting {name}: {reason}")]
    Invalid {
        /// Setting name.
        name: String,
        /// Reason.
        reason: String,
    },
}

/// Pipeline stage an ingestion error was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    /// Reading or parsing the archive file.
    Read,
    /// Normalizing a collection or record.
    Normalize,
    /// Embedding a document.
    Embed,
    /// Dropping/creating the backing store.
    Prepare,
    /// Bulk insert.
    Insert,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Read => "read",
            Self::Normalize => "normalize",
            Self::Embed => "embed",
            Self::Prepare => "prepare",
            Self::Insert => "insert",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages() {
        let err = ConfigError::SourceStoreMismatch {
            sources: 2,
            stores: 1,
        };
        assert_eq!(err.to_string(), "2 source(s) configured but 1 store(s) supplied");
        assert_eq!(
            ConfigError::InvalidSourceSpec("news".into()).to_string(),
            "invalid source spec `news`; expected LABEL=PATH"
        );
        let collision = ConfigError::TableCollision {
            table: "stock_news_wire".into(),
            first: "Wire".into(),
            second: "wire".into(),
        };
        assert_eq!(
            collision.to_string(),
            "sources `Wire` and `wire` would both be stored in table `stock_news_wire`"
        );
    }

    #[test]
    fn skip_display_includes_location() {
        let skip = ValidationSkip::new("wire", "AAPL", "expected an array of articles");
        assert_eq!(skip.to_string(), "skipped AAPL: expected an array of articles");
    }

    #[test]
    fn stage_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&LoadStage::Insert).unwrap(), "\"insert\"");
        assert_eq!(LoadStage::Embed.to_string(), "embed");
    }
}
