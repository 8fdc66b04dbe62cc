//! Stock quote summaries from the Yahoo Finance chart endpoint.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Public chart API base.
pub const DEFAULT_QUOTES_URL: &str = "https://query1.finance.yahoo.com";

/// Closing prices kept for the sparkline.
pub const CHART_POINTS: usize = 20;

/// Name used when the provider has none.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Intraday quote summary served by the retriever API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummary {
    /// Symbol as requested.
    pub symbol: String,
    /// Company name.
    pub name: String,
    /// Latest price, 0 when unknown.
    pub price: f64,
    /// Percent change from the previous close, 0 when unknown.
    pub change: f64,
    /// Last [`CHART_POINTS`] five-minute closes, oldest first.
    pub chart_data: Vec<f64>,
}

/// Client for `/v8/finance/chart/{symbol}`.
pub struct QuoteClient {
    client: Client,
    base: Url,
}

impl QuoteClient {
    /// Builds a client against `base` (normally [`DEFAULT_QUOTES_URL`]).
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid quotes URL `{base}`"))?;
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (newsdesk)"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build quotes HTTP client")?;
        Ok(Self { client, base })
    }

    fn chart_url(&self, symbol: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("quotes URL cannot be a base"))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("range", "1d")
            .append_pair("interval", "5m");
        Ok(url)
    }

    /// Fetches one symbol's summary.
    pub async fn quote(&self, symbol: &str) -> Result<QuoteSummary> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            bail!("empty symbol");
        }
        let resp = self
            .client
            .get(self.chart_url(symbol)?)
            .send()
            .await
            .with_context(|| format!("failed to request chart for {symbol}"))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse chart for {symbol}"))?;
        if !status.is_success() && body.pointer("/chart/result/0").is_none() {
            let message = chart_error(&body)
                .unwrap_or_else(|| format!("quote provider returned {status}"));
            bail!("{message}");
        }
        parse_chart(symbol, &body)
    }

    /// Summaries for several symbols, skipping the ones that fail.
    pub async fn quotes<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<QuoteSummary> {
        let mut summaries = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol = symbol.as_ref().trim();
            if symbol.is_empty() {
                continue;
            }
            match self.quote(symbol).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(symbol, error = %format!("{err:#}"), "quote skipped"),
            }
        }
        summaries
    }
}

fn chart_error(body: &Value) -> Option<String> {
    body.pointer("/chart/error/description")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Builds a [`QuoteSummary`] from a chart API payload.
pub fn parse_chart(symbol: &str, body: &Value) -> Result<QuoteSummary> {
    let result = body
        .pointer("/chart/result/0")
        .ok_or_else(|| {
            anyhow!(chart_error(body).unwrap_or_else(|| format!("no chart data for {symbol}")))
        })?;
    let meta = result.get("meta").cloned().unwrap_or(Value::Null);
    let name = ["longName", "shortName"]
        .iter()
        .find_map(|key| meta.get(*key).and_then(Value::as_str))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(UNKNOWN_NAME)
        .to_string();
    let closes: Vec<f64> = result
        .pointer("/indicators/quote/0/close")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let price = meta
        .get("regularMarketPrice")
        .and_then(Value::as_f64)
        .or_else(|| closes.last().copied())
        .unwrap_or(0.0);
    let previous = ["chartPreviousClose", "previousClose"]
        .iter()
        .find_map(|key| meta.get(*key).and_then(Value::as_f64));
    let change = match previous {
        Some(prev) if prev != 0.0 && price != 0.0 => (price - prev) / prev * 100.0,
        _ => 0.0,
    };
    let chart_data = closes[closes.len().saturating_sub(CHART_POINTS)..].to_vec();
    Ok(QuoteSummary {
        symbol: symbol.to_string(),
        name,
        price,
        change,
        chart_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chart(closes: Vec<Value>) -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "AAPL",
                        "longName": "Apple Inc.",
                        "regularMarketPrice": 110.0,
                        "chartPreviousClose": 100.0
                    },
                    "indicators": { "quote": [{ "close": closes }] }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn keeps_last_twenty_non_null_closes() {
        let mut closes: Vec<Value> = (0..30).map(|i| json!(i as f64)).collect();
        closes[28] = Value::Null;
        let summary = parse_chart("AAPL", &chart(closes)).unwrap();
        let expected: Vec<f64> = (9..28).chain(29..30).map(|i| i as f64).collect();
        assert_eq!(summary.chart_data, expected);
        assert_eq!(summary.name, "Apple Inc.");
        assert_eq!(summary.price, 110.0);
        assert!((summary.change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn missing_metadata_uses_defaults() {
        let body = json!({ "chart": { "result": [{ "meta": {} }], "error": null } });
        let summary = parse_chart("ZZZZ", &body).unwrap();
        assert_eq!(
            summary,
            QuoteSummary {
                symbol: "ZZZZ".into(),
                name: UNKNOWN_NAME.into(),
                price: 0.0,
                change: 0.0,
                chart_data: Vec::new(),
            }
        );
    }

    #[test]
    fn provider_error_is_reported() {
        let body = json!({
            "chart": {
                "result": null,
                "error": {
                    "code": "Not Found",
                    "description": "No data found, symbol may be delisted"
                }
            }
        });
        let err = parse_chart("NOPE", &body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn summary_serializes_chart_data_in_camel_case() {
        let summary = parse_chart("AAPL", &chart(vec![json!(1.0)])).unwrap();
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["chartData"], json!([1.0]));
    }

    #[tokio::test]
    async fn quotes_skip_failing_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .and(query_param("interval", "5m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart(vec![json!(1.5)])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/NOPE"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "chart": { "result": null, "error": { "description": "not found" } }
            })))
            .mount(&server)
            .await;

        let client = QuoteClient::new(&server.uri()).unwrap();
        let summaries = client.quotes(&["AAPL", " ", "NOPE"]).await;
        let symbols: Vec<&str> = summaries.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL"]);
    }
}
