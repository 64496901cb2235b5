//! Axum JSON API for the knowledge worker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Multipart, Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kw_core::{summarize_snippet, NewsItem, ReportRequest, StockSnapshot};
use kw_report::{ReportBuilder, ReportConfig, ReportError, ScheduledReportJob};
use kw_sources::{Collaborators, SourceError, SourcesConfig};
use kw_storage::{ArtifactStore, HistoryFilter, RecordStore, StoreError};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub mod upload;

use upload::{preview, safe_filename, UploadKind};

pub const CRATE_NAME: &str = "kw-web";

#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub builder: ReportBuilder,
    pub sources: Collaborators,
    pub scheduled: Arc<ScheduledReportJob>,
    pub reports_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl AppState {
    pub fn new(store: RecordStore, config: &ReportConfig, sources: Collaborators) -> Self {
        let scheduled = ScheduledReportJob::new(
            Arc::clone(&sources.news),
            Arc::clone(&sources.stock),
            store.clone(),
            ArtifactStore::new(config.reports_dir.clone()),
            config,
        )
        .with_news_query(sources.news_query(1, config.news_page_size));
        Self {
            builder: ReportBuilder::from_config(store.clone(), config),
            scheduled: Arc::new(scheduled),
            reports_dir: config.reports_dir.clone(),
            uploads_dir: config.uploads_dir.clone(),
            store,
            sources,
        }
    }

    /// Create the data directories, open the database and wire the live collaborators.
    pub async fn connect(config: &ReportConfig, sources: &SourcesConfig) -> anyhow::Result<Self> {
        config.ensure_dirs().await?;
        let store = RecordStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening database {}", config.database_url))?;
        let collaborators = Collaborators::from_config(sources)?;
        Ok(Self::new(store, config, collaborators))
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("KW_WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("KW_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Source(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn app(state: AppState) -> Router {
    let reports = ServeDir::new(&state.reports_dir);
    let uploads = ServeDir::new(&state.uploads_dir);
    Router::new()
        .route("/", get(index_handler))
        .route("/news", get(news_handler))
        .route("/stock", get(stock_handler))
        .route("/search", get(search_handler))
        .route("/summarize", post(summarize_handler))
        .route("/report/", post(quick_report_handler))
        .route("/report/build", post(build_report_handler))
        .route("/report/generate_now", post(generate_now_handler))
        .route("/report/list", get(report_list_handler))
        .route("/upload", post(upload_handler))
        .route("/upload/list", get(upload_list_handler))
        .route("/upload/download/{filename}", get(download_handler))
        .route("/history", get(history_handler))
        .route("/history/log", post(history_log_handler))
        .nest_service("/reports", reports)
        .nest_service("/uploads", uploads)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, config: &WebConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    info!(host = %config.host, port = config.port, "web server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Serve the API alone, without the scheduler.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let state = AppState::connect(&ReportConfig::from_env(), &SourcesConfig::from_env()).await?;
    serve(state, &WebConfig::from_env()).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn record_event(store: &RecordStore, event_type: &str, payload: JsonValue) {
    if let Err(err) = store.insert_history(event_type, &payload).await {
        warn!(event_type, error = %err, "history event dropped");
    }
}

async fn index_handler() -> Json<JsonValue> {
    Json(json!({
        "message": "Knowledge worker API running",
        "endpoints": [
            "/news", "/stock", "/search", "/summarize", "/report/", "/report/build",
            "/report/generate_now", "/report/list", "/upload", "/history"
        ]
    }))
}

fn default_page() -> u32 {
    1
}

fn default_news_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
struct NewsParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_news_page_size")]
    page_size: u32,
}

async fn news_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NewsParams>,
) -> Response {
    let query = state
        .sources
        .news_query(params.page.max(1), params.page_size.clamp(1, 100));
    let feed = state.sources.news.headlines(&query).await;
    if feed.refreshed {
        record_event(&state.store, "news_fetch", json!({ "count": feed.news.len() })).await;
    }
    Json(feed).into_response()
}

#[derive(Debug, Deserialize)]
struct StockParams {
    symbol: String,
}

async fn stock_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StockParams>,
) -> ApiResult<Response> {
    match state.sources.stock.fetch_quote(params.symbol.trim()).await? {
        Some(quote) => Ok(Json(quote).into_response()),
        None => Ok(Json(json!({ "message": "No data found", "data": {} })).into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_page")]
    page: u32,
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Json<JsonValue> {
    match state.sources.search.search(&params.query, params.page.max(1)).await {
        Ok(results) => Json(json!({ "query": params.query, "results": results })),
        Err(err) => {
            warn!(query = %params.query, error = %err, "search failed");
            Json(json!({ "results": [], "error": err.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummarizeBody {
    text: String,
}

async fn summarize_handler(Json(body): Json<SummarizeBody>) -> Json<JsonValue> {
    Json(json!({ "summary": summarize_snippet(&body.text) }))
}

#[derive(Debug, Default, Deserialize)]
struct QuickReportBody {
    #[serde(default)]
    news: Vec<NewsItem>,
    #[serde(default)]
    stock: Option<StockSnapshot>,
    #[serde(default)]
    insights: Vec<String>,
}

async fn quick_report_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QuickReportBody>,
) -> ApiResult<Json<JsonValue>> {
    let report = state
        .builder
        .quick_report(&body.news, body.stock.as_ref(), &body.insights)
        .await?;
    Ok(Json(json!({
        "message": "Report generated",
        "summary": report.summary,
        "file": report.filename,
        "url": report.url,
    })))
}

async fn build_report_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReportRequest>,
) -> ApiResult<Json<JsonValue>> {
    let built = state.builder.build(&request).await?;
    Ok(Json(json!({
        "status": "ok",
        "filename": built.filename,
        "url": built.url,
    })))
}

async fn generate_now_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    match state.scheduled.run().await {
        Ok(outcome) => Json(json!({
            "status": "ok",
            "file": outcome.file.display().to_string(),
            "filename": outcome.filename,
        })),
        Err(err) => {
            error!(error = %err, "on-demand report failed");
            Json(json!({ "status": "error", "error": err.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_report_limit")]
    limit: i64,
}

fn default_report_limit() -> i64 {
    20
}

async fn report_list_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JsonValue>> {
    let reports = state.store.list_reports(params.limit).await?;
    Ok(Json(json!({ "reports": reports })))
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<JsonValue>> {
    let mut received = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        received = Some((raw_name, bytes));
        break;
    }
    let (raw_name, bytes) =
        received.ok_or_else(|| ApiError::BadRequest("multipart field `file` is required".into()))?;

    let filename = safe_filename(&raw_name)
        .ok_or_else(|| ApiError::BadRequest("upload needs a file name".into()))?;
    let kind = UploadKind::from_filename(&filename)
        .ok_or_else(|| ApiError::BadRequest("Unsupported file type".into()))?;
    let data_preview = preview(kind, &bytes)
        .map_err(|e| ApiError::BadRequest(format!("could not read {filename}: {e:#}")))?;

    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .with_context(|| format!("creating {}", state.uploads_dir.display()))?;
    let path = state.uploads_dir.join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("writing upload {}", path.display()))?;

    let size = bytes.len() as i64;
    let file_path = path.display().to_string();
    state.store.insert_upload(&filename, &file_path, size).await?;
    record_event(
        &state.store,
        "file_upload",
        json!({ "filename": filename, "size": size }),
    )
    .await;
    info!(filename = %filename, size, "upload stored");

    Ok(Json(json!({
        "message": format!("{} '{}' uploaded", kind.label(), filename),
        "file_path": file_path,
        "data_preview": data_preview,
    })))
}

async fn upload_list_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<JsonValue>> {
    let uploads = state.store.list_uploads().await?;
    Ok(Json(json!({ "uploads": uploads })))
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Response> {
    let not_found = || ApiError::NotFound("File not found".into());
    let safe = safe_filename(&filename).filter(|name| *name == filename).ok_or_else(not_found)?;
    let bytes = match tokio::fs::read(state.uploads_dir.join(&safe)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(err) => return Err(anyhow::Error::new(err).context("reading upload").into()),
    };

    record_event(&state.store, "file_download", json!({ "filename": safe })).await;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn history_log_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Json<JsonValue>> {
    let event_type = body
        .get("event_type")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("event_type required".into()))?;
    let payload = body.get("payload").cloned().unwrap_or_else(|| json!({}));
    let id = state.store.insert_history(event_type, &payload).await?;
    Ok(Json(json!({ "status": "ok", "id": id })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    q: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    100
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<JsonValue>> {
    let filter = HistoryFilter {
        event_type: params.event_type.filter(|t| !t.is_empty()),
        query: params.q.filter(|q| !q.is_empty()),
        limit: params.limit,
    };
    let history = state.store.list_history(&filter).await?;
    Ok(Json(json!({ "history": history })))
}
