//! Follow-up question annotation for news archives.
//!
//! Each article is sent to a chat model, which is asked for a short JSON
//! array of questions a reader might ask next. Replies that are not valid
//! JSON are salvaged line by line.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::chat::{LlmProvider, ProviderRequest};

/// Questions requested per article.
pub const DEFAULT_QUESTION_COUNT: usize = 3;

const SYSTEM_PROMPT: &str = "You write concise follow-up questions about stock market news. \
Reply with a JSON array of strings and nothing else.";

/// Counters from one annotation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnnotationSummary {
    /// Articles that received new questions.
    pub annotated: usize,
    /// Articles left alone because they already had questions.
    pub kept: usize,
    /// Articles whose generation failed; they carry an empty list.
    pub failed: usize,
    /// Values that were not article objects.
    pub ignored: usize,
}

/// Generates questions for articles through an [`LlmProvider`].
pub struct QuestionGenerator {
    provider: Arc<dyn LlmProvider>,
    backoff: BackoffPolicy,
    count: usize,
    temperature: f32,
}

impl QuestionGenerator {
    /// Builds a generator asking for `count` questions per article.
    pub fn new(provider: Arc<dyn LlmProvider>, backoff: BackoffPolicy, count: usize) -> Self {
        Self {
            provider,
            backoff,
            count: count.max(1),
            temperature: 0.3,
        }
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn prompt(&self, stock: &str, title: &str, description: &str) -> String {
        format!(
            "Stock: {stock}\nTitle: {title}\nDescription: {description}\n\n\
             Write {} questions an investor might ask after reading this article. \
             Answer with a JSON array of {} strings.",
            self.count, self.count
        )
    }

    /// Questions for one article, retried per the backoff policy.
    ///
    /// A reply with no usable question counts as a failed attempt.
    pub async fn generate(
        &self,
        stock: &str,
        title: &str,
        description: &str,
    ) -> Result<Vec<String>> {
        let prompt = self.prompt(stock, title, description);
        let request =
            ProviderRequest::new(&prompt, self.temperature, 256).with_system(SYSTEM_PROMPT);
        let mut attempt = 1;
        loop {
            let outcome = match self.provider.answer(&request).await {
                Ok(reply) => {
                    let questions = parse_questions(&reply, self.count);
                    if questions.is_empty() {
                        Err(anyhow!("reply contained no questions"))
                    } else {
                        Ok(questions)
                    }
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(questions) => return Ok(questions),
                Err(err) if self.backoff.allows_retry(attempt) => {
                    debug!(stock, attempt, error = %err, "question generation failed; retrying");
                    self.backoff.wait(attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "question generation gave up after {attempt} attempt(s)"
                    )))
                }
            }
        }
    }

    /// Fills `questions` on every article of a ticker-keyed archive.
    ///
    /// Articles that already have questions are kept unless `overwrite`.
    /// A failed article gets an empty list and the pass continues.
    pub async fn annotate_archive(
        &self,
        archive: &mut Value,
        overwrite: bool,
    ) -> AnnotationSummary {
        let mut summary = AnnotationSummary::default();
        let Some(stocks) = archive.as_object_mut() else {
            summary.ignored += 1;
            return summary;
        };
        for (stock, records) in stocks.iter_mut() {
            let Some(records) = records.as_array_mut() else {
                summary.ignored += 1;
                continue;
            };
            for record in records.iter_mut() {
                let Some(article) = record.as_object_mut() else {
                    summary.ignored += 1;
                    continue;
                };
                let has_questions = article
                    .get("questions")
                    .and_then(Value::as_array)
                    .is_some_and(|existing| !existing.is_empty());
                if has_questions && !overwrite {
                    summary.kept += 1;
                    continue;
                }
                let title = article.get("title").and_then(Value::as_str).unwrap_or_default();
                let description = article
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let questions = match self.generate(stock, title, description).await {
                    Ok(questions) => {
                        summary.annotated += 1;
                        questions
                    }
                    Err(err) => {
                        warn!(
                            stock = stock.as_str(),
                            title,
                            error = %err,
                            "no questions generated"
                        );
                        summary.failed += 1;
                        Vec::new()
                    }
                };
                article.insert(
                    "questions".to_string(),
                    Value::Array(questions.into_iter().map(Value::String).collect()),
                );
            }
        }
        summary
    }
}

/// Extracts at most `max` questions from a model reply.
///
/// The first JSON array of strings wins. Otherwise non-empty lines are used,
/// stripped of bullets and numbering, keeping only lines ending in `?` when
/// there are any.
pub fn parse_questions(reply: &str, max: usize) -> Vec<String> {
    if let Some(questions) = first_json_array(reply) {
        return questions.into_iter().take(max).collect();
    }
    let lines: Vec<String> = reply
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.starts_with(']'))
        .map(str::to_string)
        .collect();
    let asks: Vec<String> = lines.iter().filter(|l| l.ends_with('?')).cloned().collect();
    let chosen = if asks.is_empty() { lines } else { asks };
    chosen.into_iter().take(max).collect()
}

fn first_json_array(reply: &str) -> Option<Vec<String>> {
    for (offset, _) in reply.match_indices('[') {
        let mut values = serde_json::Deserializer::from_str(&reply[offset..]).into_iter::<Value>();
        if let Some(Ok(Value::Array(items))) = values.next() {
            let questions: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
            if !questions.is_empty() {
                return Some(questions);
            }
        }
    }
    None
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim().trim_matches('"');
        }
    }
    line.trim_matches('"').trim_end_matches(',').trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn answer(&self, _request: &ProviderRequest<'_>) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            replies.remove(0)
        }
    }

    #[test]
    fn json_array_in_reply_is_preferred() {
        let reply = "Sure! Here you go:\n[\"Will margins hold?\", \"Who supplies the chips?\"]\nThanks.";
        assert_eq!(
            parse_questions(reply, 3),
            vec!["Will margins hold?", "Who supplies the chips?"]
        );
    }

    #[test]
    fn lines_are_used_when_json_is_missing() {
        let reply = "Here are some questions:\n1. Is guidance raised?\n- What about buybacks?\n* Does China matter?\n2) Extra?";
        assert_eq!(
            parse_questions(reply, 3),
            vec!["Is guidance raised?", "What about buybacks?", "Does China matter?"]
        );
    }

    #[test]
    fn non_question_lines_survive_when_nothing_ends_with_a_question_mark() {
        assert_eq!(
            parse_questions("impact on earnings\n\nsupply risk", 5),
            vec!["impact on earnings", "supply risk"]
        );
        assert!(parse_questions("   \n", 3).is_empty());
    }

    #[tokio::test]
    async fn retries_until_a_usable_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(anyhow!("503")),
            Ok("   ".to_string()),
            Ok("[\"Why now?\"]".to_string()),
        ]));
        let generator =
            QuestionGenerator::new(provider.clone(), BackoffPolicy::fixed(3, Duration::ZERO), 3);
        let questions = generator.generate("AAPL", "t", "d").await.unwrap();
        assert_eq!(questions, vec!["Why now?"]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn annotate_keeps_existing_and_empties_failures() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("[\"Q1?\", \"Q2?\"]".to_string()),
            Err(anyhow!("down")),
        ]));
        let generator = QuestionGenerator::new(provider, BackoffPolicy::none(), 3);
        let mut archive = json!({
            "AAPL": [
                { "title": "kept", "questions": ["Old?"] },
                { "title": "new" },
                { "title": "broken" },
                "not an article"
            ],
            "MSFT": "not a list"
        });

        let summary = generator.annotate_archive(&mut archive, false).await;

        assert_eq!(
            summary,
            AnnotationSummary {
                annotated: 1,
                kept: 1,
                failed: 1,
                ignored: 2
            }
        );
        assert_eq!(archive["AAPL"][0]["questions"], json!(["Old?"]));
        assert_eq!(archive["AAPL"][1]["questions"], json!(["Q1?", "Q2?"]));
        assert_eq!(archive["AAPL"][2]["questions"], json!([]));
    }
}
