use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{LlmProvider, ProviderRequest};

/// OpenAI-compatible `/chat/completions` provider (OpenAI, Together AI, ...).
pub struct OpenAiProvider {
    api_key: String,
    endpoint: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    /// Builds a provider for `{base_url}/chat/completions`.
    pub fn new(api_key: String, base_url: &str, model: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing chat API key");
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build chat HTTP client")?;
        Ok(Self {
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn answer(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid chat API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .context("failed to call chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("chat provider returned {}: {}", status, text);
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat response")?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        if answer.trim().is_empty() {
            bail!("chat response missing text content");
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "mixtral",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("k".into(), &server.uri(), "mixtral".into()).unwrap();
        let request = ProviderRequest::new("hi", 0.2, 64).with_system("be brief");
        assert_eq!(provider.answer(&request).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn surfaces_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("k".into(), &server.uri(), "m".into()).unwrap();
        let err = provider
            .answer(&ProviderRequest::new("hi", 0.0, 8))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
