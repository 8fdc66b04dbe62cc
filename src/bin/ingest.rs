use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use newsdesk::archive::write_archive;
use newsdesk::config::{
    build_embedder, build_knowledge_base, EmbedderArgs, RetryArgs, SourceArgs, StdinSecretPrompt,
    StoreArgs,
};
use newsdesk::{LoadReport, LoadStage};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk-ingest",
    about = "Load stock-news archives into one vector store per source"
)]
struct IngestCli {
    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    retry: RetryArgs,

    /// Drop and rebuild every store without asking
    #[arg(long, default_value_t = false)]
    recreate: bool,

    /// Answer yes to the reload question
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    /// Optional path for a JSON copy of the load reports
    #[arg(long, env = "NEWSDESK_INGEST_REPORT")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    newsdesk::telemetry::init_tracing();
    let cli = IngestCli::parse();

    let embedder = build_embedder(&cli.embedder, &cli.retry, &StdinSecretPrompt)?;
    let kb = build_knowledge_base(&cli.sources, &cli.store, &cli.embedder, embedder).await?;

    let reload = if cli.recreate || kb.needs_reload().await {
        true
    } else {
        cli.yes || confirm("Do you want to reload the news data?")?
    };
    if !reload {
        println!(
            "Keeping existing data for {} source{}.",
            kb.sources().len(),
            if kb.sources().len() == 1 { "" } else { "s" }
        );
        return Ok(());
    }

    let reports = kb.load_all(true).await;
    for report in &reports {
        print_report(report);
    }
    if let Some(path) = &cli.report {
        write_archive(path, &reports)?;
        println!("Load report written to {}", path.display());
    }
    if reports.iter().all(LoadReport::failed) {
        bail!("every source failed to load");
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    print!("{question} (y/n): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn print_report(report: &LoadReport) {
    let status = if report.failed() { "FAILED" } else { "ok" };
    println!(
        "[{status}] {}: {} inserted / {} records ({} skipped, {} embedding failures)",
        report.source,
        report.inserted,
        report.attempted,
        report.count(LoadStage::Normalize),
        report.count(LoadStage::Embed),
    );
    for issue in &report.errors {
        println!("    {}: {}", issue.stage, issue.message);
    }
}
