#![warn(missing_docs)]
//! Federated stock-news knowledge base.
//!
//! News archives are loaded one source at a time into independent vector
//! stores, and a query is answered by asking every store and merging the
//! ranked hits. The HTTP retriever, the chat agent and the archive tools in
//! `src/bin` are thin shells over this library.

pub mod agent;
pub mod archive;
pub mod assigner;
pub mod backoff;
pub mod chat;
pub mod config;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod loader;
pub mod newsapi;
pub mod normalizer;
pub mod orchestrator;
pub mod questions;
pub mod quotes;
pub mod search;
pub mod store;
pub mod telemetry;

pub use archive::Source;
pub use backoff::BackoffPolicy;
pub use embedder::Embedder;
pub use embeddings::EmbeddedDocument;
pub use error::{ConfigError, EmbeddingError, LoadStage, StoreError, ValidationSkip};
pub use loader::{LoadIssue, LoadReport, StoreLoader};
pub use normalizer::{normalize, normalize_archive, DocumentMetadata, NormalizedDocument};
pub use orchestrator::FederatedKnowledgeBase;
pub use search::{federated_search, merge_ranked, DEFAULT_SEARCH_LIMIT};
pub use store::{SearchResult, StoreHandle, TableName, VectorStore};
