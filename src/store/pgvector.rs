//! pgvector-backed store: one Postgres table per source.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use pgvector::Vector;
use tokio::sync::Mutex;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use super::{SearchResult, TableName, VectorStore};
use crate::embedder::Embedder;
use crate::embeddings::EmbeddedDocument;
use crate::error::StoreError;
use crate::normalizer::DocumentMetadata;

/// Connections shared by every store of one process.
///
/// Reads go through `reader` without locking so concurrent searches run in
/// parallel. DDL and insert transactions take the `writer` lock.
#[derive(Clone)]
pub struct SharedClient {
    reader: Arc<Client>,
    writer: Arc<Mutex<Client>>,
}

/// Opens the reader and writer connections, each driven on a background task.
pub async fn connect(database_url: &str) -> anyhow::Result<SharedClient> {
    let reader = open(database_url).await?;
    let writer = open(database_url).await?;
    Ok(SharedClient {
        reader: Arc::new(reader),
        writer: Arc::new(Mutex::new(writer)),
    })
}

async fn open(database_url: &str) -> anyhow::Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .with_context(|| format!("failed to connect to Postgres at {database_url}"))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection error");
        }
    });
    Ok(client)
}

/// Vector store over a single pgvector table.
pub struct PgVectorStore {
    client: SharedClient,
    table: TableName,
    name: String,
    dimensions: usize,
    embedder: Arc<dyn Embedder>,
    create_index: bool,
}

impl PgVectorStore {
    /// Binds a store to `table`; nothing is created until [`VectorStore::create`].
    pub fn new(
        client: SharedClient,
        table: TableName,
        dimensions: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            client,
            name: table.table().to_string(),
            table,
            dimensions,
            embedder,
            create_index: true,
        }
    }

    /// Skips the HNSW index (useful for small tables or old pgvector builds).
    pub fn without_index(mut self) -> Self {
        self.create_index = false;
        self
    }

    /// Backing table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    async fn ensure_schema(&self, client: &Client) -> Result<(), StoreError> {
        if self.dimensions == 0 {
            return Err(StoreError::Rejected {
                store: self.name.clone(),
                message: "embedding dimension must be positive".into(),
            });
        }
        client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await
            .map_err(|err| self.pg_error(err))?;
        client
            .batch_execute(&create_table_sql(&self.table, self.dimensions))
            .await
            .map_err(|err| self.pg_error(err))?;
        if self.create_index {
            client
                .batch_execute(&create_index_sql(&self.table))
                .await
                .map_err(|err| self.pg_error(err))?;
        }
        Ok(())
    }

    fn pg_error(&self, err: tokio_postgres::Error) -> StoreError {
        if err.as_db_error().is_some() {
            StoreError::Query {
                store: self.name.clone(),
                message: err.to_string(),
            }
        } else {
            StoreError::Connection {
                store: self.name.clone(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        let row = self
            .client
            .reader
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&self.table.schema(), &self.table.table()],
            )
            .await
            .map_err(|err| self.pg_error(err))?;
        Ok(row.get(0))
    }

    async fn create(&self) -> Result<(), StoreError> {
        let client = self.client.writer.lock().await;
        self.ensure_schema(&client).await
    }

    async fn recreate(&self) -> Result<(), StoreError> {
        let client = self.client.writer.lock().await;
        debug!(table = %self.table.qualified(), "dropping table");
        client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", self.table.qualified()))
            .await
            .map_err(|err| self.pg_error(err))?;
        self.ensure_schema(&client).await
    }

    async fn insert(&self, documents: &[EmbeddedDocument]) -> Result<usize, StoreError> {
        if documents.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = documents
            .iter()
            .find(|doc| doc.embedding.len() != self.dimensions)
        {
            return Err(StoreError::Rejected {
                store: self.name.clone(),
                message: format!(
                    "document {} has {} dimensions, table expects {}",
                    bad.id,
                    bad.embedding.len(),
                    self.dimensions
                ),
            });
        }

        let mut client = self.client.writer.lock().await;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| self.pg_error(err))?;
        let statement = transaction
            .prepare(&upsert_sql(&self.table))
            .await
            .map_err(|err| self.pg_error(err))?;
        for doc in documents {
            let vector = Vector::from(doc.embedding.clone());
            let meta = Json(&doc.metadata);
            transaction
                .execute(&statement, &[&doc.id, &doc.name, &doc.text, &meta, &vector])
                .await
                .map_err(|err| self.pg_error(err))?;
        }
        transaction.commit().await.map_err(|err| self.pg_error(err))?;
        Ok(documents.len())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|source| StoreError::QueryEmbedding {
                store: self.name.clone(),
                source,
            })?;
        let vector = Vector::from(embedding);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client
            .reader
            .query(&search_sql(&self.table), &[&vector, &limit])
            .await
            .map_err(|err| self.pg_error(err))?;
        rows.iter().map(|row| self.result_from_row(row)).collect()
    }
}

impl PgVectorStore {
    fn result_from_row(&self, row: &Row) -> Result<SearchResult, StoreError> {
        let decode = |err: tokio_postgres::Error| StoreError::Query {
            store: self.name.clone(),
            message: format!("failed to decode row: {err}"),
        };
        let Json(metadata): Json<DocumentMetadata> = row.try_get("meta_data").map_err(decode)?;
        Ok(SearchResult {
            source: self.name.clone(),
            id: row.try_get("id").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
            text: row.try_get("content").map_err(decode)?,
            metadata,
            score: row.try_get("score").map_err(decode)?,
        })
    }
}

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            meta_data JSONB NOT NULL,
            embedding VECTOR({dims}) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table.qualified()
    )
}

fn create_index_sql(table: &TableName) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
        table.embedding_index_name(),
        table.qualified()
    )
}

fn upsert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (id, name, content, meta_data, embedding) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (id) DO UPDATE SET \
                name = EXCLUDED.name, \
                content = EXCLUDED.content, \
                meta_data = EXCLUDED.meta_data, \
                embedding = EXCLUDED.embedding, \
                updated_at = now()",
        table.qualified()
    )
}

fn search_sql(table: &TableName) -> String {
    format!(
        "SELECT \
            id, \
            name, \
            content, \
            meta_data, \
            1 - (embedding <=> $1) AS score \
        FROM {} \
        ORDER BY embedding <=> $1 ASC \
        LIMIT $2",
        table.qualified()
    )
}
