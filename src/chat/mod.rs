//! Chat-completion providers used by the agent and the question annotator.

use anyhow::Result;
use async_trait::async_trait;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the model's text answer for `request`.
    async fn answer(&self, request: &ProviderRequest<'_>) -> Result<String>;
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Optional system instruction.
    pub system: Option<&'a str>,
    /// User message.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}

impl<'a> ProviderRequest<'a> {
    /// User-only request with the given sampling settings.
    pub fn new(prompt: &'a str, temperature: f32, max_tokens: usize) -> Self {
        Self {
            system: None,
            prompt,
            temperature,
            max_tokens,
        }
    }

    /// Adds a system instruction.
    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }
}
