use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use newsdesk::config::{
    build_embedder, build_knowledge_base, EmbedderArgs, RetryArgs, SourceArgs, StdinSecretPrompt,
    StoreArgs, StoreKind,
};
use newsdesk::quotes::{QuoteClient, DEFAULT_QUOTES_URL};
use newsdesk::{FederatedKnowledgeBase, SearchResult, DEFAULT_SEARCH_LIMIT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk-retriever",
    about = "HTTP API over federated stock-news search and stock quotes"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "NEWSDESK_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    retry: RetryArgs,

    /// Load every source before serving (always on for the memory store).
    #[arg(long, default_value_t = false)]
    load_on_start: bool,

    /// Default result count when the client does not override it.
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    default_limit: usize,

    /// Maximum result count allowed per request.
    #[arg(long, default_value_t = 20)]
    max_limit: usize,

    /// Base URL of the chart API used for quotes.
    #[arg(long, env = "NEWSDESK_QUOTES_BASE", default_value = DEFAULT_QUOTES_URL)]
    quotes_base_url: String,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,
}

#[derive(Clone)]
struct AppState {
    kb: Arc<FederatedKnowledgeBase>,
    quotes: Arc<QuoteClient>,
    default_limit: usize,
    max_limit: usize,
    rate_limiter: Option<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    limit: usize,
    latency_ms: f64,
    stores: usize,
}

#[derive(Debug, Deserialize)]
struct StocksQuery {
    symbols: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    newsdesk::telemetry::init_tracing();
    let cli = ApiCli::parse();

    let embedder = build_embedder(&cli.embedder, &cli.retry, &StdinSecretPrompt)?;
    let kb = build_knowledge_base(&cli.sources, &cli.store, &cli.embedder, embedder).await?;
    if cli.load_on_start || cli.store.store == StoreKind::Memory {
        for report in kb.load_all(false).await {
            info!(
                source = %report.source,
                inserted = report.inserted,
                attempted = report.attempted,
                issues = report.errors.len(),
                "source loaded"
            );
        }
    } else if kb.needs_reload().await {
        warn!("some stores are missing; run newsdesk-ingest or pass --load-on-start");
    }

    let state = AppState {
        kb: Arc::new(kb),
        quotes: Arc::new(QuoteClient::new(&cli.quotes_base_url)?),
        default_limit: cli.default_limit,
        max_limit: cli.max_limit.max(1),
        rate_limiter: RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
    };
    let app = router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    println!("newsdesk-retriever listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/search", post(search_handler))
        .route("/api/stocks", get(stocks_handler))
        .route("/api/stocks/{symbol}", get(stock_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorBody>)> {
    if request.query.trim().is_empty() {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "query text must not be empty",
        ));
    }
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err(error_body(
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded",
            ));
        }
    }
    let limit = request
        .limit
        .unwrap_or(state.default_limit)
        .min(state.max_limit);
    let start = Instant::now();
    let results = state.kb.search(&request.query, limit).await;
    Ok(Json(SearchResponse {
        results,
        meta: ResponseMeta {
            limit,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            stores: state.kb.handles().len(),
        },
    }))
}

async fn stock_handler(State(state): State<AppState>, Path(symbol): Path<String>) -> Json<Value> {
    match state.quotes.quote(&symbol).await {
        Ok(summary) => Json(json!(summary)),
        Err(err) => Json(json!({ "error": format!("{err:#}") })),
    }
}

async fn stocks_handler(
    State(state): State<AppState>,
    Query(query): Query<StocksQuery>,
) -> Json<Value> {
    let symbols: Vec<&str> = query.symbols.split(',').collect();
    Json(json!(state.quotes.quotes(&symbols).await))
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

#[derive(Clone)]
struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        let refill_per_sec = max_per_minute as f64 / 60.0;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec,
        })
    }

    async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use newsdesk::store::InMemoryStore;
    use newsdesk::{Embedder, EmbeddingError, Source, VectorStore};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt as _;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY_LIMIT: usize = 1024 * 1024;

    struct FlatEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FlatEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.5])
        }
    }

    /// Two memory-backed sources, three articles in the first.
    async fn test_state(
        dir: &TempDir,
        quotes_base: &str,
        rate_limiter: Option<RateLimiter>,
    ) -> AppState {
        let wire = dir.path().join("wire.json");
        let archive = json!({
            "AAPL": [{ "title": "one" }, { "title": "two" }, { "title": "three" }]
        });
        std::fs::write(&wire, archive.to_string()).unwrap();
        let blogs = dir.path().join("blogs.json");
        std::fs::write(&blogs, "{}").unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(FlatEmbedder);
        let sources = vec![Source::new("wire", wire), Source::new("blogs", blogs)];
        let stores: Vec<Arc<dyn VectorStore>> = sources
            .iter()
            .map(|source| {
                Arc::new(InMemoryStore::new(source.label.clone(), embedder.clone()))
                    as Arc<dyn VectorStore>
            })
            .collect();
        let kb = FederatedKnowledgeBase::new(sources, stores, embedder).unwrap();
        kb.load_all(false).await;
        AppState {
            kb: Arc::new(kb),
            quotes: Arc::new(QuoteClient::new(quotes_base).unwrap()),
            default_limit: 5,
            max_limit: 2,
            rate_limiter,
        }
    }

    fn search_request(payload: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/search")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn burst_is_spent_then_requests_are_refused() {
        let limiter = RateLimiter::new(1, 2).unwrap();
        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[test]
    fn zero_rate_disables_limiting() {
        assert!(RateLimiter::new(0, 5).is_none());
        assert!(RateLimiter::new(60, 0).is_none());
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir, "http://127.0.0.1:1", None).await);
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn blank_query_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir, "http://127.0.0.1:1", None).await);
        let resp = app.oneshot(search_request(json!({ "query": "   " }))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(resp).await,
            json!({ "message": "query text must not be empty" })
        );
    }

    #[tokio::test]
    async fn limit_is_capped_and_reported_in_meta() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir, "http://127.0.0.1:1", None).await);
        let resp = app
            .oneshot(search_request(json!({ "query": "apple", "limit": 50 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["meta"]["limit"], json!(2));
        assert_eq!(body["meta"]["stores"], json!(2));
        assert!(body["meta"]["latency_ms"].is_number());
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|hit| hit["source"] == json!("wire")));
    }

    #[tokio::test]
    async fn spent_limiter_answers_too_many_requests() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, "http://127.0.0.1:1", RateLimiter::new(1, 1)).await;
        let app = router(state);

        let first = app
            .clone()
            .oneshot(search_request(json!({ "query": "apple" })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(search_request(json!({ "query": "apple" })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(second).await, json!({ "message": "rate limit exceeded" }));
    }

    #[tokio::test]
    async fn quote_failure_is_reported_as_an_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/NOPE"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "chart": { "result": null, "error": { "description": "No data found" } }
            })))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir, &server.uri(), None).await);

        let req = Request::builder()
            .uri("/api/stocks/NOPE")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "error": "No data found" }));
    }
}
