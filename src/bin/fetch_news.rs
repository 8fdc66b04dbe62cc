use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use newsdesk::archive::write_archive;
use newsdesk::config::{resolve_secret, RetryArgs, StdinSecretPrompt};
use newsdesk::newsapi::{NewsDataClient, DEFAULT_NEWS_URL, DEFAULT_TICKERS};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk-fetch",
    about = "Fetch recent business news per ticker from NewsData.io into a JSON archive"
)]
struct FetchCli {
    /// Tickers to fetch (comma separated); defaults to ten large caps
    #[arg(long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// Archive file to write
    #[arg(long, env = "NEWSDESK_ARCHIVE", default_value = "stock_news.json")]
    output: PathBuf,

    /// NewsData.io API key
    #[arg(long, env = "NEWSDATA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// News endpoint
    #[arg(long, env = "NEWSDESK_NEWS_URL", default_value = DEFAULT_NEWS_URL)]
    news_url: String,

    /// Milliseconds to wait between tickers
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    #[command(flatten)]
    retry: RetryArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    newsdesk::telemetry::init_tracing();
    let cli = FetchCli::parse();

    let api_key = resolve_secret(cli.api_key.clone(), "NEWSDATA_API_KEY", &StdinSecretPrompt)?;
    let client = NewsDataClient::new(api_key, &cli.news_url, cli.retry.policy())?
        .with_ticker_delay(Duration::from_millis(cli.delay_ms));
    let tickers: Vec<String> = if cli.tickers.is_empty() {
        DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect()
    } else {
        cli.tickers
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect()
    };

    let archive = client.fetch_all(&tickers).await;
    for (ticker, articles) in &archive {
        let count = articles.as_array().map(Vec::len).unwrap_or(0);
        println!("{ticker}: {count} article{}", if count == 1 { "" } else { "s" });
    }
    write_archive(&cli.output, &Value::Object(archive))?;
    println!("News data saved to {}", cli.output.display());
    Ok(())
}
