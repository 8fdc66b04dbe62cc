//! Command-line configuration shared by the binaries.
//!
//! Each binary flattens the groups it needs into its own `clap` parser.
//! Every option has an environment fallback; secrets that are still missing
//! are asked for through a [`SecretPrompt`].

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::archive::Source;
use crate::backoff::BackoffPolicy;
use crate::chat::{AnthropicProvider, LlmProvider, OpenAiProvider};
use crate::embedder::{CachingEmbedder, Embedder, OpenAiEmbedder};
use crate::error::ConfigError;
use crate::orchestrator::FederatedKnowledgeBase;
use crate::store::{InMemoryStore, PgVectorStore, TableName, VectorStore};

/// Together AI's OpenAI-compatible API root.
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "togethercomputer/m2-bert-80M-32k-retrieval";
/// Width of [`DEFAULT_EMBEDDING_MODEL`] vectors.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "mistralai/Mixtral-8x7B-Instruct-v0.1";
/// Default archive when no `--source` is given.
pub const DEFAULT_ARCHIVE: &str = "stock_news.json";
/// Prefix of per-source pgvector tables.
pub const DEFAULT_TABLE_PREFIX: &str = "stock_news_";

/// Supplies secrets that were not given on the command line or environment.
pub trait SecretPrompt {
    /// Returns a value for `name`, or `None` when the user cannot be asked.
    fn prompt(&self, name: &str) -> Option<String>;
}

/// Asks on the terminal; silent when stdin is not interactive.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinSecretPrompt;

impl SecretPrompt for StdinSecretPrompt {
    fn prompt(&self, name: &str) -> Option<String> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return None;
        }
        eprint!("Enter {name}: ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        stdin.lock().read_line(&mut line).ok()?;
        let value = line.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// Never supplies anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSecretPrompt;

impl SecretPrompt for NoSecretPrompt {
    fn prompt(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Returns `value` when set and non-blank, otherwise asks `prompt`.
pub fn resolve_secret(
    value: Option<String>,
    name: &str,
    prompt: &dyn SecretPrompt,
) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| prompt.prompt(name))
        .ok_or_else(|| ConfigError::MissingSecret(name.to_string()))
}

/// Retry settings for HTTP adapters.
#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    /// Attempts per request, including the first.
    #[arg(long, env = "NEWSDESK_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: usize,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "NEWSDESK_RETRY_BASE_MS", default_value_t = 500)]
    pub retry_base_ms: u64,

    /// Upper bound on a single retry delay, in milliseconds.
    #[arg(long, env = "NEWSDESK_RETRY_MAX_MS", default_value_t = 16_000)]
    pub retry_max_ms: u64,

    /// Proportional jitter applied to each delay (0.0 - 1.0).
    #[arg(long, env = "NEWSDESK_RETRY_JITTER", default_value_t = 0.2)]
    pub retry_jitter: f64,
}

impl RetryArgs {
    /// Policy described by these arguments.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
            self.retry_jitter,
        )
    }
}

/// Embedding provider settings.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// API key for the embedding provider.
    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible embeddings API.
    #[arg(long, env = "NEWSDESK_EMBEDDING_BASE", default_value = TOGETHER_BASE_URL)]
    pub embedding_base_url: String,

    /// Embedding model identifier.
    #[arg(long, env = "NEWSDESK_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Vector width; checked on every embedding and used for the table column.
    #[arg(
        long,
        env = "NEWSDESK_EMBEDDING_DIMENSIONS",
        default_value_t = DEFAULT_EMBEDDING_DIMENSIONS
    )]
    pub embedding_dimensions: usize,

    /// Also send `dimensions` to the provider (OpenAI text-embedding-3 models).
    #[arg(long, env = "NEWSDESK_SEND_DIMENSIONS", default_value_t = false)]
    pub send_dimensions: bool,

    /// Seconds before an embedding request times out.
    #[arg(long, env = "NEWSDESK_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Cached query embeddings kept in memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    pub embedding_cache_size: usize,
}

/// Archive sources.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Archive to load, as LABEL=PATH or a bare PATH (label = file stem).
    /// Repeat for several sources.
    #[arg(
        long = "source",
        value_name = "LABEL=PATH",
        env = "NEWSDESK_SOURCES",
        value_delimiter = ',',
        default_value = DEFAULT_ARCHIVE
    )]
    pub sources: Vec<Source>,
}

/// Which vector store backs each source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// One pgvector table per source.
    Pgvector,
    /// Process-local stores; contents vanish on exit.
    Memory,
}

/// Vector store settings.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Store backend.
    #[arg(long, env = "NEWSDESK_STORE", value_enum, default_value_t = StoreKind::Pgvector)]
    pub store: StoreKind,

    /// Postgres connection string (postgres://...), required for pgvector.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema holding the per-source tables.
    #[arg(long, env = "NEWSDESK_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Prefix prepended to each source label to form its table name.
    #[arg(long, env = "NEWSDESK_TABLE_PREFIX", default_value = DEFAULT_TABLE_PREFIX)]
    pub table_prefix: String,

    /// Skip creating the HNSW index.
    #[arg(long, default_value_t = false)]
    pub no_index: bool,
}

/// Chat provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChatProviderKind {
    /// Any OpenAI-compatible chat completions API (Together AI by default).
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// Chat model settings.
#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// Chat provider.
    #[arg(
        long,
        env = "NEWSDESK_LLM_PROVIDER",
        value_enum,
        default_value_t = ChatProviderKind::Openai
    )]
    pub llm_provider: ChatProviderKind,

    /// API key for the OpenAI-compatible chat provider.
    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    pub chat_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible chat API.
    #[arg(long, env = "NEWSDESK_CHAT_BASE", default_value = TOGETHER_BASE_URL)]
    pub chat_base_url: String,

    /// Chat model for the OpenAI-compatible provider.
    #[arg(long, env = "NEWSDESK_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Anthropic API key (with `--llm-provider anthropic`).
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Anthropic model identifier.
    #[arg(long, env = "NEWSDESK_ANTHROPIC_MODEL", default_value = "claude-3-5-sonnet-latest")]
    pub anthropic_model: String,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.2)]
    pub temperature: f32,

    /// Maximum tokens requested per completion.
    #[arg(long, default_value_t = 600)]
    pub max_completion_tokens: usize,
}

/// Builds the shared, caching query/document embedder.
pub fn build_embedder(
    args: &EmbedderArgs,
    retry: &RetryArgs,
    prompt: &dyn SecretPrompt,
) -> Result<Arc<dyn Embedder>> {
    let api_key = resolve_secret(args.embedding_api_key.clone(), "TOGETHER_API_KEY", prompt)?;
    let mut embedder = OpenAiEmbedder::new(
        api_key,
        args.embedding_base_url.clone(),
        args.embedding_model.clone(),
        Some(args.embedding_dimensions),
        Duration::from_secs(args.embedding_timeout_secs.max(1)),
        retry.policy(),
    )?;
    if !args.send_dimensions {
        embedder = embedder.without_dimensions_param();
    }
    Ok(Arc::new(CachingEmbedder::new(
        embedder,
        args.embedding_cache_size,
    )))
}

/// One store per source, index-aligned with `sources`.
pub async fn build_stores(
    args: &StoreArgs,
    sources: &[Source],
    dimensions: usize,
    embedder: Arc<dyn Embedder>,
) -> Result<Vec<Arc<dyn VectorStore>>> {
    match args.store {
        StoreKind::Memory => Ok(sources
            .iter()
            .map(|source| {
                Arc::new(InMemoryStore::new(source.label.clone(), embedder.clone()))
                    as Arc<dyn VectorStore>
            })
            .collect()),
        StoreKind::Pgvector => {
            let database_url = args.database_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid {
                    name: "database-url".into(),
                    reason: "required for the pgvector store (set DATABASE_URL)".into(),
                }
            })?;
            let tables = TableName::for_sources(
                &args.schema,
                &args.table_prefix,
                sources.iter().map(|source| source.label.as_str()),
            )?;
            let client = crate::store::pgvector::connect(database_url).await?;
            let mut stores: Vec<Arc<dyn VectorStore>> = Vec::with_capacity(sources.len());
            for table in tables {
                let mut store =
                    PgVectorStore::new(client.clone(), table, dimensions, embedder.clone());
                if args.no_index {
                    store = store.without_index();
                }
                stores.push(Arc::new(store));
            }
            Ok(stores)
        }
    }
}

/// Builds the knowledge base for the configured sources.
pub async fn build_knowledge_base(
    sources: &SourceArgs,
    stores: &StoreArgs,
    embedder_args: &EmbedderArgs,
    embedder: Arc<dyn Embedder>,
) -> Result<FederatedKnowledgeBase> {
    let sources = sources.sources.clone();
    let built = build_stores(
        stores,
        &sources,
        embedder_args.embedding_dimensions,
        embedder.clone(),
    )
    .await
    .context("failed to set up vector stores")?;
    Ok(FederatedKnowledgeBase::new(sources, built, embedder)?)
}

/// Builds the configured chat provider.
pub fn build_chat_provider(
    args: &ChatArgs,
    prompt: &dyn SecretPrompt,
) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match args.llm_provider {
        ChatProviderKind::Openai => {
            let key = resolve_secret(args.chat_api_key.clone(), "TOGETHER_API_KEY", prompt)?;
            Arc::new(OpenAiProvider::new(key, &args.chat_base_url, args.chat_model.clone())?)
        }
        ChatProviderKind::Anthropic => {
            let key = resolve_secret(args.anthropic_api_key.clone(), "ANTHROPIC_API_KEY", prompt)?;
            Arc::new(AnthropicProvider::new(key, args.anthropic_model.clone())?)
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    struct FixedPrompt(&'static str);

    impl SecretPrompt for FixedPrompt {
        fn prompt(&self, _name: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        sources: SourceArgs,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        retry: RetryArgs,
    }

    #[test]
    fn explicit_secret_wins_over_prompt() {
        let value = resolve_secret(Some(" key ".into()), "K", &FixedPrompt("prompted")).unwrap();
        assert_eq!(value, "key");
    }

    #[test]
    fn blank_secret_falls_back_to_prompt() {
        let value = resolve_secret(Some("  ".into()), "K", &FixedPrompt("prompted")).unwrap();
        assert_eq!(value, "prompted");
    }

    #[test]
    fn missing_secret_without_prompt_is_a_config_error() {
        let err = resolve_secret(None, "TOGETHER_API_KEY", &NoSecretPrompt).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(name) if name == "TOGETHER_API_KEY"));
    }

    #[test]
    fn repeated_source_flags_keep_order() {
        let cli = TestCli::try_parse_from([
            "test",
            "--source",
            "wire=data/wire.json",
            "--source",
            "blogs=data/blogs.json",
            "--store",
            "memory",
        ])
        .unwrap();
        let labels: Vec<&str> = cli.sources.sources.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["wire", "blogs"]);
        assert_eq!(cli.sources.sources[1].path, PathBuf::from("data/blogs.json"));
        assert_eq!(cli.store.store, StoreKind::Memory);
    }

    #[test]
    fn malformed_source_is_rejected_by_the_parser() {
        assert!(TestCli::try_parse_from(["test", "--source", "=nothing"]).is_err());
    }

    #[test]
    fn retry_args_build_a_policy() {
        let cli = TestCli::try_parse_from(["test", "--max-attempts", "2", "--retry-jitter", "0"])
            .unwrap();
        let policy = cli.retry.policy();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn memory_stores_align_with_sources() {
        struct Zero;
        #[async_trait::async_trait]
        impl Embedder for Zero {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::error::EmbeddingError> {
                Ok(vec![0.0])
            }
        }
        let cli = TestCli::try_parse_from([
            "test", "--source", "a=a.json", "--source", "b=b.json", "--store", "memory",
        ])
        .unwrap();
        let stores = build_stores(&cli.store, &cli.sources.sources, 1, Arc::new(Zero))
            .await
            .unwrap();
        let names: Vec<&str> = stores.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn pgvector_labels_sharing_a_table_fail_before_connecting() {
        struct Zero;
        #[async_trait::async_trait]
        impl Embedder for Zero {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::error::EmbeddingError> {
                Ok(vec![0.0])
            }
        }
        // Nothing listens on port 1; reaching `connect` would fail with a different error.
        let cli = TestCli::try_parse_from([
            "test",
            "--source",
            "wire-feed=a.json",
            "--source",
            "wire_feed=b.json",
            "--store",
            "pgvector",
            "--database-url",
            "postgres://nobody@127.0.0.1:1/none",
            "--table-prefix",
            "stock_news_",
        ])
        .unwrap();
        let err = match build_stores(&cli.store, &cli.sources.sources, 1, Arc::new(Zero)).await {
            Ok(_) => panic!("colliding labels must be rejected"),
            Err(err) => err,
        };
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::TableCollision {
                table: "stock_news_wire_feed".into(),
                first: "wire-feed".into(),
                second: "wire_feed".into(),
            })
        );
    }
}
