//! OpenAI-compatible embedding client (OpenAI, Together AI, local gateways).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Embedder;
use crate::backoff::BackoffPolicy;
use crate::error::EmbeddingError;

const MAX_ERROR_BODY: usize = 512;

/// Embeddings client that talks to `{base_url}/embeddings`.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    send_dimensions: bool,
    backoff: BackoffPolicy,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    ///
    /// `dimensions`, when set, is forwarded to the provider and every returned
    /// vector is checked against it.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "embedding base URL must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            send_dimensions: true,
            backoff,
        })
    }

    /// Keeps checking vector length but stops sending `dimensions` upstream,
    /// for providers whose models have a fixed width and reject the field.
    pub fn without_dimensions_param(mut self) -> Self {
        self.send_dimensions = false;
        self
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends a batch of strings and returns one vector per input, in order.
    pub async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 1usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions.filter(|_| self.send_dimensions),
            };
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .await
                            .map_err(|err| EmbeddingError::Malformed(err.to_string()))?;
                        return self.collect_vectors(parsed, inputs.len());
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && self.backoff.allows_retry(attempt) {
                        debug!(%status, attempt, "retrying embedding request");
                        self.backoff.wait(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(EmbeddingError::Status {
                        status: status.as_u16(),
                        body: truncate(&body),
                    });
                }
                Err(err) => {
                    if is_retryable_error(&err) && self.backoff.allows_retry(attempt) {
                        debug!(error = %err, attempt, "retrying embedding request");
                        self.backoff.wait(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(EmbeddingError::Transport(err.to_string()));
                }
            }
        }
    }

    fn collect_vectors(
        &self,
        mut parsed: EmbeddingResponse,
        expected_len: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if parsed.data.len() != expected_len {
            return Err(EmbeddingError::Malformed(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                expected_len
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        let mut out = Vec::with_capacity(expected_len);
        for entry in parsed.data {
            if entry.embedding.is_empty() {
                return Err(EmbeddingError::EmptyVector);
            }
            if let Some(expected) = self.dimensions {
                if entry.embedding.len() != expected {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: entry.embedding.len(),
                    });
                }
            }
            out.push(entry.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("provider returned no embedding".into()))
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, dimensions: Option<usize>) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            "test-key".into(),
            server.uri(),
            "m2-bert".into(),
            dimensions,
            Duration::from_secs(5),
            BackoffPolicy::fixed(3, Duration::from_millis(1)),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn embeds_single_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "m2-bert", "input": ["hello"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.25, 0.5], "index": 0 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vector = client(&server, None).embed("hello").await.expect("embed");
        assert_eq!(vector, vec![0.25, 0.5]);
    }

    #[tokio::test]
    async fn batch_results_follow_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [2.0], "index": 1 },
                    { "embedding": [1.0], "index": 0 }
                ]
            })))
            .mount(&server)
            .await;

        let vectors = client(&server, None)
            .embed_batch(&["first", "second"])
            .await
            .expect("embed");
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn retries_rate_limited_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [1.0, 0.0, 0.0], "index": 0 }]
            })))
            .mount(&server)
            .await;

        let vector = client(&server, Some(3)).embed("retry me").await.expect("embed");
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, None).embed("x").await.unwrap_err();
        match err {
            EmbeddingError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad input");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [1.0, 2.0], "index": 0 }]
            })))
            .mount(&server)
            .await;

        let err = client(&server, Some(4)).embed("x").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }
}
