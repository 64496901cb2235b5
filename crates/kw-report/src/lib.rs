//! Report pipeline: outline assembly, artifact rendering, record keeping and
//! the scheduled job runner.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use kw_core::{NewReport, NewsItem, ReportRequest, StockSnapshot};
use kw_storage::{ArtifactStore, RecordStore, StoreError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

pub mod outline;
pub mod render;
pub mod schedule;

pub use outline::{build_outline, build_quick_outline, quick_summary};
pub use render::{sanitize_title, ArtifactFormat, ArtifactRenderer, PdfCapability, RenderedArtifact};
pub use schedule::{ReportScheduler, ScheduledOutcome, ScheduledReport, ScheduledReportJob};

pub const CRATE_NAME: &str = "kw-report";

/// Public URL prefix under which report artifacts are served.
pub const REPORTS_URL_PREFIX: &str = "/reports";

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub database_url: String,
    pub scheduler_enabled: bool,
    pub daily_cron: String,
    /// Zero disables the interval trigger.
    pub hourly_interval_secs: u64,
    pub skip_overlapping: bool,
    pub stock_symbol: String,
    pub news_page_size: u32,
    pub pdf_enabled: bool,
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("KW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let mut config = Self::for_data_dir(data_dir);

        if let Ok(dir) = std::env::var("KW_UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        config.scheduler_enabled = env_flag("KW_SCHEDULER_ENABLED", config.scheduler_enabled);
        if let Ok(cron) = std::env::var("KW_DAILY_CRON") {
            config.daily_cron = cron;
        }
        config.hourly_interval_secs = std::env::var("KW_HOURLY_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.hourly_interval_secs);
        config.skip_overlapping = env_flag("KW_SCHEDULER_SKIP_OVERLAP", config.skip_overlapping);
        if let Ok(symbol) = std::env::var("KW_STOCK_SYMBOL") {
            config.stock_symbol = symbol;
        }
        config.news_page_size = std::env::var("KW_NEWS_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.news_page_size);
        config.pdf_enabled = env_flag("KW_PDF_ENABLED", config.pdf_enabled);
        config
    }

    /// Defaults rooted at `data_dir`; uploads stay in `./uploads`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            reports_dir: data_dir.join("reports"),
            uploads_dir: PathBuf::from("./uploads"),
            database_url: format!("sqlite://{}", data_dir.join("app.db").display()),
            scheduler_enabled: true,
            daily_cron: "0 0 9 * * *".to_string(),
            hourly_interval_secs: 3600,
            skip_overlapping: false,
            stock_symbol: "AAPL".to_string(),
            news_page_size: 5,
            pdf_enabled: true,
            data_dir,
        }
    }

    pub fn pdf_capability(&self) -> Option<PdfCapability> {
        PdfCapability::detect(self.pdf_enabled)
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [&self.data_dir, &self.reports_dir, &self.uploads_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(default)
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("writing report artifact: {0:#}")]
    Artifact(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serializing report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltReport {
    pub record_id: i64,
    pub filename: String,
    pub url: String,
    pub format: ArtifactFormat,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickReport {
    pub summary: String,
    pub filename: String,
    pub url: String,
}

pub fn report_url(filename: &str) -> String {
    format!("{REPORTS_URL_PREFIX}/{filename}")
}

/// Manual report builds: outline, artifact, then the metadata record.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    store: RecordStore,
    renderer: ArtifactRenderer,
}

impl ReportBuilder {
    pub fn new(store: RecordStore, renderer: ArtifactRenderer) -> Self {
        Self { store, renderer }
    }

    pub fn from_config(store: RecordStore, config: &ReportConfig) -> Self {
        let renderer = ArtifactRenderer::new(
            ArtifactStore::new(config.reports_dir.clone()),
            config.pdf_capability(),
        );
        Self::new(store, renderer)
    }

    pub fn renderer(&self) -> &ArtifactRenderer {
        &self.renderer
    }

    /// The record is inserted only once the artifact is on disk. A storage
    /// failure after that leaves the artifact in place.
    pub async fn build(&self, request: &ReportRequest) -> Result<BuiltReport, ReportError> {
        let title = request.display_title();
        self.build_titled(request, title)
            .instrument(info_span!("report_build", title = %title))
            .await
    }

    async fn build_titled(
        &self,
        request: &ReportRequest,
        title: &str,
    ) -> Result<BuiltReport, ReportError> {
        let outline = build_outline(request);
        let artifact = self
            .renderer
            .render_named(&outline, title, &request.title, Utc::now())
            .await
            .map_err(ReportError::Artifact)?;

        let record = NewReport {
            title: title.to_string(),
            artifact_filename: artifact.filename.clone(),
            news: serde_json::to_value(&request.news)?,
            stock: serde_json::to_value(&request.stock)?,
            uploads: serde_json::to_value(&request.uploads)?,
            insights: outline.insights.clone(),
            summary: (!outline.insights.is_empty()).then(|| outline.insights.join("\n")),
        };
        let record_id = self.store.insert_report(&record).await?;
        info!(record_id, filename = %artifact.filename, insights = outline.insights.len(), "report built");

        if let Err(err) = self
            .store
            .insert_history(
                "report_build",
                &json!({ "title": title, "filename": artifact.filename }),
            )
            .await
        {
            debug!(error = %err, "report_build history event dropped");
        }

        Ok(BuiltReport {
            record_id,
            url: report_url(&artifact.filename),
            filename: artifact.filename,
            format: artifact.format,
            insights: outline.insights,
        })
    }

    /// Quick project report from already-fetched headlines. Not recorded.
    pub async fn quick_report(
        &self,
        news: &[NewsItem],
        stock: Option<&StockSnapshot>,
        insights: &[String],
    ) -> Result<QuickReport, ReportError> {
        let summary = quick_summary(news);
        let outline = build_quick_outline(news, stock, insights);
        let artifact = self
            .renderer
            .render(&outline, "Project Report", Utc::now())
            .await
            .map_err(ReportError::Artifact)?;
        info!(filename = %artifact.filename, "quick report written");
        Ok(QuickReport {
            summary,
            url: report_url(&artifact.filename),
            filename: artifact.filename,
        })
    }
}
