//! Unattended report generation and the cron/interval scheduler that drives it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use kw_core::{NewReport, NewsArticle, StockSnapshot};
use kw_sources::{NewsQuery, NewsService, StockSource};
use kw_storage::{ArtifactStore, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{ReportConfig, ReportError};

/// Document written by each scheduled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledReport {
    pub generated_at: DateTime<Utc>,
    pub news: Vec<NewsArticle>,
    pub stock: Option<StockSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledOutcome {
    pub record_id: i64,
    pub file: PathBuf,
    pub filename: String,
    pub summary: String,
}

pub struct ScheduledReportJob {
    news: Arc<NewsService>,
    stock: Arc<dyn StockSource>,
    store: RecordStore,
    artifacts: ArtifactStore,
    symbol: String,
    news_query: NewsQuery,
    skip_overlapping: bool,
    in_flight: AtomicBool,
}

impl ScheduledReportJob {
    pub fn new(
        news: Arc<NewsService>,
        stock: Arc<dyn StockSource>,
        store: RecordStore,
        artifacts: ArtifactStore,
        config: &ReportConfig,
    ) -> Self {
        Self {
            news,
            stock,
            store,
            artifacts,
            symbol: config.stock_symbol.clone(),
            news_query: NewsQuery {
                page: 1,
                page_size: config.news_page_size,
                ..NewsQuery::default()
            },
            skip_overlapping: config.skip_overlapping,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_news_query(mut self, query: NewsQuery) -> Self {
        self.news_query = query;
        self
    }

    /// Collect news and one stock snapshot, write them as JSON and record the run.
    pub async fn run(&self) -> Result<ScheduledOutcome, ReportError> {
        let generated_at = Utc::now();

        let feed = self.news.headlines(&self.news_query).await;
        if let Some(err) = &feed.error {
            warn!(error = %err, "news unavailable for scheduled report");
        }
        if feed.refreshed {
            if let Err(err) = self
                .store
                .insert_history("news_fetch", &json!({ "count": feed.news.len() }))
                .await
            {
                debug!(error = %err, "news_fetch history event dropped");
            }
        }

        let stock = match self.stock.fetch_quote(&self.symbol).await {
            Ok(quote) => quote,
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "stock unavailable for scheduled report");
                None
            }
        };

        let report = ScheduledReport {
            generated_at,
            news: feed.news,
            stock,
        };
        let bytes = serde_json::to_vec_pretty(&report)?;
        let stored = self
            .artifacts
            .write_new(&format!("report_{}", generated_at.timestamp()), "json", &bytes)
            .await
            .map_err(ReportError::Artifact)?;

        let summary = format!(
            "{} news items; stock {} snapshot.",
            report.news.len(),
            self.symbol
        );
        let title = format!(
            "Auto report {}",
            generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
        let record_id = self
            .store
            .insert_report(&NewReport {
                title,
                artifact_filename: stored.filename.clone(),
                news: serde_json::to_value(&report.news)?,
                stock: serde_json::to_value(&report.stock)?,
                uploads: json!([]),
                insights: Vec::new(),
                summary: Some(summary.clone()),
            })
            .await?;

        Ok(ScheduledOutcome {
            record_id,
            file: stored.absolute_path,
            filename: stored.filename,
            summary,
        })
    }

    /// Run once on behalf of a trigger. Failures are logged, never retried.
    /// Returns whether a run actually happened.
    pub async fn fire(&self, trigger: &'static str) -> bool {
        let _guard = if self.skip_overlapping {
            match InFlight::claim(&self.in_flight) {
                Some(guard) => Some(guard),
                None => {
                    info!(trigger, "scheduled report already in flight; skipping");
                    return false;
                }
            }
        } else {
            None
        };

        let run_id = Uuid::new_v4();
        let result = self
            .run()
            .instrument(info_span!("scheduled_report", %run_id, trigger))
            .await;

        match result {
            Ok(outcome) => {
                info!(%run_id, trigger, filename = %outcome.filename, summary = %outcome.summary, "scheduled report written");
            }
            Err(err) => {
                error!(%run_id, trigger, error = %err, "scheduled report failed");
            }
        }
        true
    }
}

/// Holds the in-flight flag for one run; released on drop, including unwinds.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owned handle over the cron scheduler. Stopped until [`start`](Self::start).
pub struct ReportScheduler {
    job: Arc<ScheduledReportJob>,
    daily_cron: String,
    hourly_interval: Option<Duration>,
    scheduler: Option<JobScheduler>,
}

impl ReportScheduler {
    pub fn new(job: Arc<ScheduledReportJob>, config: &ReportConfig) -> Self {
        Self {
            job,
            daily_cron: config.daily_cron.clone(),
            hourly_interval: (config.hourly_interval_secs > 0)
                .then(|| Duration::from_secs(config.hourly_interval_secs)),
            scheduler: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.scheduler.is_some() {
            debug!("report scheduler already running");
            return Ok(());
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let daily_job = Arc::clone(&self.job);
        let daily = Job::new_async_tz(self.daily_cron.as_str(), Local, move |_uuid, _l| {
            let job = Arc::clone(&daily_job);
            Box::pin(async move {
                job.fire("daily").await;
            })
        })
        .with_context(|| format!("creating daily report job for cron {}", self.daily_cron))?;
        sched.add(daily).await.context("adding daily report job")?;

        if let Some(interval) = self.hourly_interval {
            let hourly_job = Arc::clone(&self.job);
            let hourly = Job::new_repeated_async(interval, move |_uuid, _l| {
                let job = Arc::clone(&hourly_job);
                Box::pin(async move {
                    job.fire("interval").await;
                })
            })
            .context("creating interval report job")?;
            sched.add(hourly).await.context("adding interval report job")?;
        }

        sched.start().await.context("starting scheduler")?;
        info!(
            daily_cron = %self.daily_cron,
            interval_secs = self.hourly_interval.map(|d| d.as_secs()),
            "report scheduler started"
        );
        self.scheduler = Some(sched);
        Ok(())
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(mut sched) = self.scheduler.take() {
            sched.shutdown().await.context("stopping scheduler")?;
            info!("report scheduler stopped");
        }
        Ok(())
    }
}
