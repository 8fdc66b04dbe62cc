use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use newsdesk::archive::{read_archive, write_archive};
use newsdesk::config::{build_chat_provider, ChatArgs, RetryArgs, StdinSecretPrompt};
use newsdesk::questions::{QuestionGenerator, DEFAULT_QUESTION_COUNT};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk-annotate",
    about = "Add model-written follow-up questions to every article of a news archive"
)]
struct AnnotateCli {
    /// Archive to annotate
    #[arg(long, env = "NEWSDESK_ARCHIVE", default_value = "stock_news.json")]
    input: PathBuf,

    /// Where to write the annotated archive (defaults to overwriting the input)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Questions requested per article
    #[arg(long, default_value_t = DEFAULT_QUESTION_COUNT)]
    questions: usize,

    /// Regenerate questions for articles that already have some
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    #[command(flatten)]
    chat: ChatArgs,

    #[command(flatten)]
    retry: RetryArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    newsdesk::telemetry::init_tracing();
    let cli = AnnotateCli::parse();

    let mut archive = read_archive(&cli.input)?;
    let provider = build_chat_provider(&cli.chat, &StdinSecretPrompt)?;
    let generator = QuestionGenerator::new(provider, cli.retry.policy(), cli.questions)
        .with_temperature(cli.chat.temperature);
    let summary = generator.annotate_archive(&mut archive, cli.overwrite).await;

    let output = cli.output.as_ref().unwrap_or(&cli.input);
    write_archive(output, &archive)?;
    println!(
        "Annotated {} article(s), kept {}, failed {}, ignored {}; written to {}",
        summary.annotated,
        summary.kept,
        summary.failed,
        summary.ignored,
        output.display()
    );
    Ok(())
}
