use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{LlmProvider, ProviderRequest};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic messages API provider.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl AnthropicProvider {
    /// Builds a provider against the public messages endpoint.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            api_key,
            model,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        })
    }

    /// Points the provider at a different messages endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn answer(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .context("failed to call Anthropic messages API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Anthropic returned {}: {}", status, text);
        }
        let parsed: AnthropicResponse = resp
            .json()
            .await
            .context("failed to parse Anthropic response")?;
        let answer = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            bail!("Anthropic response missing text content");
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn joins_text_blocks_and_ignores_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "text", "text": "first" },
                    { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                    { "type": "text", "text": "second" }
                ]
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("secret".into(), "claude".into())
            .unwrap()
            .with_endpoint(format!("{}/v1/messages", server.uri()));
        let answer = provider
            .answer(&ProviderRequest::new("hi", 0.2, 32))
            .await
            .unwrap();
        assert_eq!(answer, "first\nsecond");
    }
}
