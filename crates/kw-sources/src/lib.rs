//! Third-party data collaborators (news, stock quotes, web search) and the
//! per-query news cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kw_core::{NewsArticle, StockSnapshot};
use kw_storage::{FetchError, HttpClientConfig, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "kw-sources";

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub news_api_key: String,
    pub news_api_url: String,
    pub news_country: String,
    pub alpha_vantage_key: String,
    pub alpha_vantage_url: String,
    pub serpapi_key: String,
    pub serpapi_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub news_cache_ttl_secs: u64,
}

impl SourcesConfig {
    pub fn from_env() -> Self {
        Self {
            news_api_key: std::env::var("NEWS_API_KEY").unwrap_or_default(),
            news_api_url: std::env::var("NEWS_API_URL")
                .unwrap_or_else(|_| "https://newsapi.org/v2/top-headlines".to_string()),
            news_country: std::env::var("NEWS_COUNTRY").unwrap_or_else(|_| "us".to_string()),
            alpha_vantage_key: std::env::var("ALPHA_VANTAGE_KEY").unwrap_or_default(),
            alpha_vantage_url: std::env::var("ALPHA_VANTAGE_URL")
                .unwrap_or_else(|_| "https://www.alphavantage.co/query".to_string()),
            serpapi_key: std::env::var("SERPAPI_KEY").unwrap_or_default(),
            serpapi_url: std::env::var("SERPAPI_URL")
                .unwrap_or_else(|_| "https://serpapi.com/search.json".to_string()),
            http_timeout_secs: std::env::var("KW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("KW_USER_AGENT")
                .unwrap_or_else(|_| "knowledge-worker/0.1".to_string()),
            news_cache_ttl_secs: std::env::var("KW_NEWS_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
        }
    }

    pub fn http_client(&self) -> anyhow::Result<HttpFetcher> {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        })
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{source_id}: {message}")]
    Api {
        source_id: &'static str,
        message: String,
    },
    #[error("{0} is not configured")]
    MissingKey(&'static str),
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Query parameters for a page of headlines; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewsQuery {
    pub country: String,
    pub page: u32,
    pub page_size: u32,
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self {
            country: "us".to_string(),
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: Option<String>,
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_news(&self, query: &NewsQuery) -> Result<Vec<NewsArticle>, SourceError>;
}

#[async_trait]
pub trait StockSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// `Ok(None)` when the provider has no quote for the symbol.
    async fn fetch_quote(&self, symbol: &str) -> Result<Option<StockSnapshot>, SourceError>;
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn search(&self, query: &str, page: u32) -> Result<Vec<SearchResult>, SourceError>;
}

/// NewsAPI `top-headlines`.
pub struct NewsApiSource {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl NewsApiSource {
    pub fn new(http: HttpFetcher, config: &SourcesConfig) -> Self {
        Self {
            http,
            base_url: config.news_api_url.clone(),
            api_key: config.news_api_key.clone(),
        }
    }
}

#[async_trait]
impl NewsSource for NewsApiSource {
    fn source_id(&self) -> &'static str {
        "newsapi"
    }

    async fn fetch_news(&self, query: &NewsQuery) -> Result<Vec<NewsArticle>, SourceError> {
        if self.api_key.is_empty() {
            return Err(SourceError::MissingKey("NEWS_API_KEY"));
        }
        let params = [
            ("country", query.country.clone()),
            ("page", query.page.to_string()),
            ("pageSize", query.page_size.to_string()),
            ("apiKey", self.api_key.clone()),
        ];
        let fetched = self
            .http
            .get_json(self.source_id(), &self.base_url, &params)
            .await?;
        parse_news_api(&fetched.body)
    }
}

/// Alpha Vantage `GLOBAL_QUOTE`.
pub struct AlphaVantageSource {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl AlphaVantageSource {
    pub fn new(http: HttpFetcher, config: &SourcesConfig) -> Self {
        Self {
            http,
            base_url: config.alpha_vantage_url.clone(),
            api_key: config.alpha_vantage_key.clone(),
        }
    }
}

#[async_trait]
impl StockSource for AlphaVantageSource {
    fn source_id(&self) -> &'static str {
        "alphavantage"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Option<StockSnapshot>, SourceError> {
        if self.api_key.is_empty() {
            return Err(SourceError::MissingKey("ALPHA_VANTAGE_KEY"));
        }
        let params = [
            ("function", "GLOBAL_QUOTE".to_string()),
            ("symbol", symbol.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        let fetched = self
            .http
            .get_json(self.source_id(), &self.base_url, &params)
            .await?;
        let quote = parse_global_quote(&fetched.body);
        if quote.is_none() {
            if let Some(note) = provider_note(&fetched.body) {
                warn!(symbol, note, "alphavantage returned no quote");
            }
        }
        Ok(quote)
    }
}

/// SerpAPI Google engine, ten results per page.
pub struct SerpApiSource {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl SerpApiSource {
    pub fn new(http: HttpFetcher, config: &SourcesConfig) -> Self {
        Self {
            http,
            base_url: config.serpapi_url.clone(),
            api_key: config.serpapi_key.clone(),
        }
    }
}

#[async_trait]
impl SearchSource for SerpApiSource {
    fn source_id(&self) -> &'static str {
        "serpapi"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<SearchResult>, SourceError> {
        if self.api_key.is_empty() {
            return Err(SourceError::MissingKey("SERPAPI_KEY"));
        }
        let start = page.max(1).saturating_sub(1) * 10;
        let params = [
            ("engine", "google".to_string()),
            ("q", query.to_string()),
            ("api_key", self.api_key.clone()),
            ("num", "10".to_string()),
            ("start", start.to_string()),
        ];
        let fetched = self
            .http
            .get_json(self.source_id(), &self.base_url, &params)
            .await?;
        parse_serpapi(&fetched.body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

pub fn parse_news_api(body: &JsonValue) -> Result<Vec<NewsArticle>, SourceError> {
    if body.get("status").and_then(JsonValue::as_str) != Some("ok") {
        let message = body
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("news provider returned an error")
            .to_string();
        return Err(SourceError::Api {
            source_id: "newsapi",
            message,
        });
    }

    let articles: Vec<NewsApiArticle> = match body.get("articles") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    Ok(articles
        .into_iter()
        .map(|a| NewsArticle {
            title: a.title.unwrap_or_default(),
            description: a.description,
            url: a.url,
            url_to_image: a.url_to_image,
            published_at: a.published_at,
        })
        .collect())
}

pub fn parse_global_quote(body: &JsonValue) -> Option<StockSnapshot> {
    let quote = body.get("Global Quote")?.as_object()?;
    let field = |key: &str| {
        quote
            .get(key)
            .and_then(JsonValue::as_str)
            .map(ToString::to_string)
    };
    let symbol = field("01. symbol")?;
    Some(StockSnapshot {
        symbol,
        price: field("05. price"),
        change: field("09. change"),
        change_percent: field("10. change percent"),
        latest_trading_day: field("07. latest trading day"),
    })
}

fn provider_note(body: &JsonValue) -> Option<&str> {
    ["Note", "Information", "Error Message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(JsonValue::as_str))
}

pub fn parse_serpapi(body: &JsonValue) -> Result<Vec<SearchResult>, SourceError> {
    if let Some(message) = body.get("error").and_then(JsonValue::as_str) {
        return Err(SourceError::Api {
            source_id: "serpapi",
            message: message.to_string(),
        });
    }
    match body.get("organic_results") {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    articles: Vec<NewsArticle>,
    fetched_at: DateTime<Utc>,
}

/// The live collaborators behind one shared HTTP client.
#[derive(Clone)]
pub struct Collaborators {
    pub news: Arc<NewsService>,
    pub stock: Arc<dyn StockSource>,
    pub search: Arc<dyn SearchSource>,
    pub news_country: String,
}

impl Collaborators {
    pub fn from_config(config: &SourcesConfig) -> anyhow::Result<Self> {
        let http = config.http_client()?;
        let news = NewsApiSource::new(http.clone(), config);
        Ok(Self {
            news: Arc::new(NewsService::new(
                Arc::new(news),
                Duration::from_secs(config.news_cache_ttl_secs),
            )),
            stock: Arc::new(AlphaVantageSource::new(http.clone(), config)),
            search: Arc::new(SerpApiSource::new(http, config)),
            news_country: config.news_country.clone(),
        })
    }

    pub fn news_query(&self, page: u32, page_size: u32) -> NewsQuery {
        NewsQuery {
            country: self.news_country.clone(),
            page,
            page_size,
        }
    }
}

/// Entries older than this many TTLs are dropped on the next write.
const STALE_HORIZON_TTLS: i32 = 4;

/// Headlines cached per query with an explicit time-to-live.
#[derive(Debug)]
pub struct NewsCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<NewsQuery, CacheEntry>>,
}

impl NewsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Cached articles younger than the TTL. Empty entries never count as fresh.
    pub async fn get_fresh(&self, query: &NewsQuery, now: DateTime<Utc>) -> Option<Vec<NewsArticle>> {
        let entries = self.entries.lock().await;
        entries
            .get(query)
            .filter(|e| !e.articles.is_empty() && now - e.fetched_at <= self.ttl)
            .map(|e| e.articles.clone())
    }

    /// Cached articles regardless of age.
    pub async fn get_any(&self, query: &NewsQuery) -> Vec<NewsArticle> {
        let entries = self.entries.lock().await;
        entries
            .get(query)
            .map(|e| e.articles.clone())
            .unwrap_or_default()
    }

    /// Store a fetch result and prune entries past the stale horizon.
    pub async fn put(&self, query: NewsQuery, articles: Vec<NewsArticle>, now: DateTime<Utc>) {
        let horizon = self.ttl.checked_mul(STALE_HORIZON_TTLS).unwrap_or(self.ttl);
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now - entry.fetched_at <= horizon);
        entries.insert(
            query,
            CacheEntry {
                articles,
                fetched_at: now,
            },
        );
    }

    pub async fn invalidate(&self, query: &NewsQuery) {
        self.entries.lock().await.remove(query);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Result of a headlines lookup. Collaborator failures are reported inline
/// alongside whatever was cached for the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsFeed {
    pub news: Vec<NewsArticle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when this call fetched fresh data from the provider.
    #[serde(skip)]
    pub refreshed: bool,
}

/// News collaborator that owns its cache.
pub struct NewsService {
    source: Arc<dyn NewsSource>,
    cache: NewsCache,
}

impl NewsService {
    pub fn new(source: Arc<dyn NewsSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: NewsCache::new(ttl),
        }
    }

    pub fn cache(&self) -> &NewsCache {
        &self.cache
    }

    pub async fn headlines(&self, query: &NewsQuery) -> NewsFeed {
        let now = Utc::now();
        if let Some(news) = self.cache.get_fresh(query, now).await {
            return NewsFeed {
                news,
                error: None,
                refreshed: false,
            };
        }

        match self.source.fetch_news(query).await {
            Ok(news) => {
                info!(
                    source_id = self.source.source_id(),
                    count = news.len(),
                    page = query.page,
                    "fetched headlines"
                );
                self.cache.put(query.clone(), news.clone(), now).await;
                NewsFeed {
                    news,
                    error: None,
                    refreshed: true,
                }
            }
            Err(err) => {
                warn!(source_id = self.source.source_id(), error = %err, "headline fetch failed");
                NewsFeed {
                    news: self.cache.get_any(query).await,
                    error: Some(err.to_string()),
                    refreshed: false,
                }
            }
        }
    }
}
