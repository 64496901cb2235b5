use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kw_core::{NewsArticle, StockSnapshot};
use kw_report::{ReportConfig, ReportScheduler, ScheduledReport, ScheduledReportJob};
use kw_sources::{NewsQuery, NewsService, NewsSource, SourceError, StockSource};
use kw_storage::{ArtifactStore, HistoryFilter, RecordStore};
use tempfile::tempdir;

struct FixedNews {
    articles: usize,
    fail: bool,
}

#[async_trait]
impl NewsSource for FixedNews {
    fn source_id(&self) -> &'static str {
        "fixed-news"
    }

    async fn fetch_news(&self, query: &NewsQuery) -> Result<Vec<NewsArticle>, SourceError> {
        if self.fail {
            return Err(SourceError::MissingKey("NEWS_API_KEY"));
        }
        Ok((0..self.articles.min(query.page_size as usize))
            .map(|i| NewsArticle {
                title: format!("Headline {i}"),
                description: Some(format!("Story {i}.")),
                url: Some(format!("https://example.com/{i}")),
                url_to_image: None,
                published_at: None,
            })
            .collect())
    }
}

struct SlowStock {
    delay: Duration,
    calls: AtomicUsize,
    panics: AtomicUsize,
    quote: Option<StockSnapshot>,
}

#[async_trait]
impl StockSource for SlowStock {
    fn source_id(&self) -> &'static str {
        "slow-stock"
    }

    async fn fetch_quote(&self, _symbol: &str) -> Result<Option<StockSnapshot>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("quote provider blew up");
        }
        tokio::time::sleep(self.delay).await;
        Ok(self.quote.clone())
    }
}

fn quote() -> StockSnapshot {
    StockSnapshot {
        symbol: "AAPL".into(),
        price: Some("150.00".into()),
        change: Some("+1.00".into()),
        change_percent: Some("0.67%".into()),
        latest_trading_day: Some("2026-10-16".into()),
    }
}

async fn job_with(
    dir: &std::path::Path,
    news: FixedNews,
    stock: Arc<SlowStock>,
    configure: impl FnOnce(&mut ReportConfig),
) -> (ScheduledReportJob, RecordStore) {
    let mut config = ReportConfig::for_data_dir(dir);
    configure(&mut config);
    let store = RecordStore::in_memory().await.expect("store");
    let news = Arc::new(NewsService::new(Arc::new(news), Duration::from_secs(1800)));
    let job = ScheduledReportJob::new(
        news,
        stock,
        store.clone(),
        ArtifactStore::new(config.reports_dir.clone()),
        &config,
    );
    (job, store)
}

fn slow_stock(delay_ms: u64, quote: Option<StockSnapshot>) -> Arc<SlowStock> {
    Arc::new(SlowStock {
        delay: Duration::from_millis(delay_ms),
        calls: AtomicUsize::new(0),
        panics: AtomicUsize::new(0),
        quote,
    })
}

#[tokio::test]
async fn run_writes_json_and_records_summary() {
    let dir = tempdir().expect("tempdir");
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 20, fail: false },
        slow_stock(0, Some(quote())),
        |_| {},
    )
    .await;

    let outcome = job.run().await.expect("run");

    assert!(outcome.filename.starts_with("report_"));
    assert!(outcome.filename.ends_with(".json"));
    assert_eq!(outcome.summary, "5 news items; stock AAPL snapshot.");

    let written: ScheduledReport =
        serde_json::from_slice(&std::fs::read(&outcome.file).unwrap()).unwrap();
    assert_eq!(written.news.len(), 5);
    assert_eq!(written.stock, Some(quote()));

    let reports = store.list_reports(10).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].title.starts_with("Auto report "));
    assert_eq!(reports[0].artifact_filename, outcome.filename);
    assert_eq!(reports[0].summary.as_deref(), Some("5 news items; stock AAPL snapshot."));

    let fetches = store
        .list_history(&HistoryFilter {
            event_type: Some("news_fetch".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].payload["count"], 5);
}

#[tokio::test]
async fn collaborator_failures_degrade_to_empty_data() {
    let dir = tempdir().expect("tempdir");
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 0, fail: true },
        slow_stock(0, None),
        |config| config.stock_symbol = "MSFT".into(),
    )
    .await;

    let outcome = job.run().await.expect("run");

    assert_eq!(outcome.summary, "0 news items; stock MSFT snapshot.");
    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&outcome.file).unwrap()).unwrap();
    assert_eq!(written["news"], serde_json::json!([]));
    assert!(written["stock"].is_null());
    assert_eq!(store.list_reports(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn overlapping_fires_run_by_default() {
    let dir = tempdir().expect("tempdir");
    let stock = slow_stock(50, Some(quote()));
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 2, fail: false },
        Arc::clone(&stock),
        |_| {},
    )
    .await;

    let (first, second) = tokio::join!(job.fire("daily"), job.fire("interval"));

    assert!(first && second);
    assert_eq!(stock.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.list_reports(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn skip_guard_drops_trigger_while_in_flight() {
    let dir = tempdir().expect("tempdir");
    let stock = slow_stock(50, Some(quote()));
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 2, fail: false },
        Arc::clone(&stock),
        |config| config.skip_overlapping = true,
    )
    .await;

    let (first, second) = tokio::join!(job.fire("daily"), job.fire("interval"));

    assert!(first);
    assert!(!second);
    assert_eq!(stock.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.list_reports(10).await.unwrap().len(), 1);

    // The guard is released once the run finishes.
    assert!(job.fire("interval").await);
}

#[tokio::test]
async fn skip_guard_is_released_after_a_panicking_run() {
    let dir = tempdir().expect("tempdir");
    let stock = slow_stock(0, Some(quote()));
    stock.panics.store(1, Ordering::SeqCst);
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 2, fail: false },
        Arc::clone(&stock),
        |config| config.skip_overlapping = true,
    )
    .await;
    let job = Arc::new(job);

    let panicked = tokio::spawn({
        let job = Arc::clone(&job);
        async move { job.fire("daily").await }
    })
    .await;
    assert!(panicked.is_err());

    assert!(job.fire("interval").await);
    assert_eq!(stock.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.list_reports(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn fire_swallows_store_failures() {
    let dir = tempdir().expect("tempdir");
    let (job, store) = job_with(
        dir.path(),
        FixedNews { articles: 1, fail: false },
        slow_stock(0, None),
        |_| {},
    )
    .await;
    store.close().await;

    assert!(job.fire("daily").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_start_is_idempotent_and_shuts_down() {
    let dir = tempdir().expect("tempdir");
    let (job, _store) = job_with(
        dir.path(),
        FixedNews { articles: 1, fail: false },
        slow_stock(0, None),
        |_| {},
    )
    .await;
    let config = ReportConfig::for_data_dir(dir.path());

    let mut scheduler = ReportScheduler::new(Arc::new(job), &config);
    assert!(!scheduler.is_running());
    scheduler.start().await.expect("start");
    assert!(scheduler.is_running());
    scheduler.start().await.expect("second start");
    assert!(scheduler.is_running());
    scheduler.shutdown().await.expect("shutdown");
}
