//! NewsData.io client that builds ticker-keyed news archives.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::BackoffPolicy;

/// Public NewsData.io news endpoint.
pub const DEFAULT_NEWS_URL: &str = "https://newsdata.io/api/1/news";

/// Tickers fetched when none are given.
pub const DEFAULT_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "JPM", "BAC", "WMT",
];

/// Pause between two ticker requests.
pub const DEFAULT_TICKER_DELAY: Duration = Duration::from_secs(1);

/// Fetches business headlines per ticker.
pub struct NewsDataClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    backoff: BackoffPolicy,
    ticker_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Value,
    #[serde(default)]
    message: Option<Value>,
}

impl NewsDataClient {
    /// Builds a client for `endpoint` (normally [`DEFAULT_NEWS_URL`]).
    pub fn new(api_key: String, endpoint: &str, backoff: BackoffPolicy) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing NewsData API key");
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid news endpoint `{endpoint}`"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build news HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            backoff,
            ticker_delay: DEFAULT_TICKER_DELAY,
        })
    }

    /// Overrides the pause between tickers.
    pub fn with_ticker_delay(mut self, delay: Duration) -> Self {
        self.ticker_delay = delay;
        self
    }

    fn request_url(&self, ticker: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("qInTitle", ticker)
            .append_pair("category", "business")
            .append_pair("language", "en")
            .append_pair("country", "us");
        url
    }

    /// Articles for one ticker that mention it in the title or description.
    pub async fn fetch_ticker(&self, ticker: &str) -> Result<Vec<Value>> {
        let url = self.request_url(ticker);
        let mut attempt = 1;
        let response = loop {
            let err = match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => break resp,
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !retryable(status) {
                        bail!("news provider returned {status} for {ticker}: {body}");
                    }
                    anyhow!("news provider returned {status}")
                }
                Err(err) => anyhow!(err).context("news request failed"),
            };
            if !self.backoff.allows_retry(attempt) {
                return Err(
                    err.context(format!("giving up on {ticker} after {attempt} attempt(s)"))
                );
            }
            debug!(ticker, attempt, error = %err, "news request failed; retrying");
            self.backoff.wait(attempt).await;
            attempt += 1;
        };
        let parsed: NewsResponse = response
            .json()
            .await
            .with_context(|| format!("failed to parse news response for {ticker}"))?;
        if parsed.status != "success" {
            // Error payloads carry the message either at the top level or
            // inside `results`.
            let message = parsed
                .message
                .or_else(|| parsed.results.get("message").cloned())
                .map(|m| match m {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "Unknown error".to_string());
            bail!("news provider reported failure for {ticker}: {message}");
        }
        let Value::Array(results) = parsed.results else {
            return Ok(Vec::new());
        };
        Ok(results
            .into_iter()
            .filter(|article| mentions(article, ticker))
            .collect())
    }

    /// Fetches every ticker in order. A failed ticker maps to an empty list.
    pub async fn fetch_all<S: AsRef<str>>(&self, tickers: &[S]) -> Map<String, Value> {
        let mut archive = Map::new();
        for (position, ticker) in tickers.iter().enumerate() {
            let ticker = ticker.as_ref();
            let articles = match self.fetch_ticker(ticker).await {
                Ok(articles) => {
                    info!(ticker, articles = articles.len(), "fetched news");
                    articles
                }
                Err(err) => {
                    warn!(ticker, error = %format!("{err:#}"), "news fetch failed");
                    Vec::new()
                }
            };
            archive.insert(ticker.to_string(), Value::Array(articles));
            if position + 1 < tickers.len() && !self.ticker_delay.is_zero() {
                tokio::time::sleep(self.ticker_delay).await;
            }
        }
        archive
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Case-insensitive ticker match on `title` or `description`.
pub fn mentions(article: &Value, ticker: &str) -> bool {
    let needle = ticker.to_lowercase();
    ["title", "description"].iter().any(|field| {
        article
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}
