use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use newsdesk::agent::{build_prompt, is_exit_command, render_context, NewsAnalyst};
use newsdesk::config::{
    build_chat_provider, build_embedder, build_knowledge_base, ChatArgs, EmbedderArgs, RetryArgs,
    SourceArgs, StdinSecretPrompt, StoreArgs, StoreKind,
};
use newsdesk::{FederatedKnowledgeBase, DEFAULT_SEARCH_LIMIT};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk-chat",
    about = "Chat with a stock-news analyst grounded in the federated news stores"
)]
struct ChatCli {
    /// Ask one question and exit instead of starting the interactive loop
    #[arg(long)]
    query: Option<String>,

    /// Articles retrieved per question
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: usize,

    /// Reload every source before chatting
    #[arg(long, default_value_t = false)]
    reload: bool,

    /// Only print the retrieved context (skip LLM call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    chat: ChatArgs,

    #[command(flatten)]
    retry: RetryArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    newsdesk::telemetry::init_tracing();
    let cli = ChatCli::parse();

    let embedder = build_embedder(&cli.embedder, &cli.retry, &StdinSecretPrompt)?;
    let kb = build_knowledge_base(&cli.sources, &cli.store, &cli.embedder, embedder).await?;
    if cli.reload || cli.store.store == StoreKind::Memory || kb.needs_reload().await {
        let reports = kb.load_all(cli.reload).await;
        let inserted: usize = reports.iter().map(|r| r.inserted).sum();
        println!("Loaded {inserted} articles from {} source(s).", reports.len());
    }
    let kb = Arc::new(kb);

    if cli.dry_run {
        return dry_run(&kb, &cli).await;
    }

    let provider = build_chat_provider(&cli.chat, &StdinSecretPrompt)?;
    let analyst = NewsAnalyst::new(
        kb,
        provider,
        cli.limit,
        cli.chat.temperature,
        cli.chat.max_completion_tokens,
    );

    if let Some(question) = &cli.query {
        let reply = analyst.ask(question).await?;
        println!("{}", reply.answer.trim());
        return Ok(());
    }

    println!("Ask about the stock news (type exit, quit or bye to leave).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            break;
        }
        match analyst.ask(question).await {
            Ok(reply) => println!("\n{}\n", reply.answer.trim()),
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    println!("Goodbye!");
    Ok(())
}

async fn dry_run(kb: &FederatedKnowledgeBase, cli: &ChatCli) -> Result<()> {
    let question = cli.query.as_deref().unwrap_or("latest stock market news");
    let results = kb.search(question, cli.limit).await;
    let context_block = render_context(&results);
    println!("--- Prompt ---\n{}", build_prompt(question, &context_block));
    println!("dry-run enabled; skipping LLM call.");
    Ok(())
}
