//! Stock-news analyst: answers questions grounded in federated search hits.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;

use crate::chat::{LlmProvider, ProviderRequest};
use crate::orchestrator::FederatedKnowledgeBase;
use crate::store::SearchResult;

/// Who the model is asked to be.
pub const ANALYST_DESCRIPTION: &str =
    "You are a stock market news analyst. You help users find and analyze relevant stock market news.";

/// Standing instructions appended to the description.
pub const ANALYST_INSTRUCTIONS: &[&str] = &[
    "Always cite the source of news articles when discussing them",
    "When analyzing news, consider potential market implications",
    "Include relevant questions from the articles in your analysis",
];

/// Words that end an interactive session.
pub const EXIT_COMMANDS: &[&str] = &["exit", "quit", "bye"];

/// True when `input` asks to leave the chat loop.
pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    EXIT_COMMANDS
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}

/// Description plus numbered instructions.
pub fn system_prompt() -> String {
    let mut prompt = String::from(ANALYST_DESCRIPTION);
    prompt.push_str("\n\nInstructions:\n");
    for (idx, instruction) in ANALYST_INSTRUCTIONS.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", idx + 1, instruction);
    }
    prompt
}

/// Renders hits as a citation-friendly context block.
pub fn render_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::from("(no matching articles)\n");
    }
    let mut out = String::new();
    for (idx, hit) in results.iter().enumerate() {
        let meta = &hit.metadata;
        let _ = writeln!(out, "[{}] {} ({})", idx + 1, meta.title, meta.stock);
        let _ = writeln!(
            out,
            "Source: {} | File: {} | Score: {:.4}",
            hit.source, meta.source_file, hit.score
        );
        if !meta.link.is_empty() {
            let _ = writeln!(out, "Link: {}", meta.link);
        }
        if !meta.published_date.is_empty() {
            let _ = writeln!(out, "Published: {}", meta.published_date);
        }
        let _ = writeln!(out, "{}", hit.text.trim());
        if !meta.questions.is_empty() {
            let _ = writeln!(out, "Questions: {}", meta.questions.join(" | "));
        }
        out.push_str("---\n");
    }
    out
}

/// User turn: retrieved articles followed by the question.
pub fn build_prompt(question: &str, context_block: &str) -> String {
    format!(
        "Relevant news articles:\n{context_block}\nQuestion:\n{}\n\n\
         Cite articles by their [number] and link.",
        question.trim()
    )
}

/// Retrieval plus one model call per question.
pub struct NewsAnalyst {
    kb: Arc<FederatedKnowledgeBase>,
    provider: Arc<dyn LlmProvider>,
    limit: usize,
    temperature: f32,
    max_tokens: usize,
}

/// A model answer with the hits it was grounded on.
#[derive(Debug)]
pub struct AnalystAnswer {
    /// Model reply.
    pub answer: String,
    /// Hits given to the model, best first.
    pub results: Vec<SearchResult>,
}

impl NewsAnalyst {
    /// Builds an analyst over `kb` retrieving `limit` hits per question.
    pub fn new(
        kb: Arc<FederatedKnowledgeBase>,
        provider: Arc<dyn LlmProvider>,
        limit: usize,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            kb,
            provider,
            limit,
            temperature,
            max_tokens,
        }
    }

    /// Searches every store and asks the model.
    pub async fn ask(&self, question: &str) -> Result<AnalystAnswer> {
        let results = self.kb.search(question, self.limit).await;
        let context_block = render_context(&results);
        let prompt = build_prompt(question, &context_block);
        let system = system_prompt();
        let request =
            ProviderRequest::new(&prompt, self.temperature, self.max_tokens).with_system(&system);
        let answer = self.provider.answer(&request).await?;
        Ok(AnalystAnswer { answer, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::DocumentMetadata;

    fn hit(title: &str, questions: Vec<String>) -> SearchResult {
        SearchResult {
            source: "wire".into(),
            id: "0_0_deadbeef".into(),
            name: title.into(),
            text: format!("Title: {title}"),
            metadata: DocumentMetadata {
                stock: "TSLA".into(),
                title: title.into(),
                link: "https://example.com/tsla".into(),
                published_date: String::new(),
                questions,
                source_file: "wire.json".into(),
            },
            score: 0.8123,
        }
    }

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit_command(" Quit "));
        assert!(is_exit_command("BYE"));
        assert!(!is_exit_command("exit strategy for TSLA?"));
    }

    #[test]
    fn system_prompt_lists_every_instruction() {
        let prompt = system_prompt();
        assert!(prompt.starts_with(ANALYST_DESCRIPTION));
        assert!(prompt.contains("1. Always cite the source"));
        assert!(prompt.contains("3. Include relevant questions"));
    }

    #[test]
    fn context_carries_source_link_and_questions() {
        let block = render_context(&[hit("Tesla recalls", vec!["How costly?".into()])]);
        assert!(block.contains("[1] Tesla recalls (TSLA)"));
        assert!(block.contains("Source: wire | File: wire.json | Score: 0.8123"));
        assert!(block.contains("Link: https://example.com/tsla"));
        assert!(block.contains("Questions: How costly?"));
        assert!(!block.contains("Published:"));
    }

    #[test]
    fn empty_context_is_explicit() {
        assert_eq!(render_context(&[]), "(no matching articles)\n");
    }
}
