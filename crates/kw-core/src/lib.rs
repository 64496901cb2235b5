//! Core domain model for the knowledge worker: report inputs, outlines and
//! the records persisted around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod summarize;

pub use summarize::{summarize, summarize_snippet, SummaryLimit};

pub const CRATE_NAME: &str = "kw-core";

pub const DEFAULT_REPORT_TITLE: &str = "Custom Report";

/// Upper bound on insights collected while assembling a report.
pub const MAX_INSIGHTS: usize = 5;

/// A news entry as supplied to the report builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Normalized article returned by the news collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

impl From<NewsArticle> for NewsItem {
    fn from(article: NewsArticle) -> Self {
        Self {
            title: article.title,
            url: article.url,
            description: article.description,
        }
    }
}

/// Point-in-time quote for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub symbol: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub change: Option<String>,
    #[serde(default)]
    pub change_percent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_trading_day: Option<String>,
}

/// Inputs for one manual report build. Not persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(default = "default_title", deserialize_with = "title_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub news: Vec<NewsItem>,
    #[serde(default)]
    pub stock: Option<StockSnapshot>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uploads: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            title: default_title(),
            news: Vec::new(),
            stock: None,
            uploads: Vec::new(),
            notes: None,
        }
    }
}

impl ReportRequest {
    /// Title used in the document; a blank title falls back to the default.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            DEFAULT_REPORT_TITLE
        } else {
            &self.title
        }
    }
}

fn default_title() -> String {
    DEFAULT_REPORT_TITLE.to_string()
}

fn title_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_title))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Rendered document body plus the short strings extracted along the way.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportOutline {
    pub lines: Vec<String>,
    pub insights: Vec<String>,
}

impl ReportOutline {
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends an insight unless the cap has been reached. Returns whether it was kept.
    pub fn push_insight(&mut self, insight: impl Into<String>) -> bool {
        if self.insights.len() >= MAX_INSIGHTS {
            return false;
        }
        self.insights.push(insight.into());
        true
    }

    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Insert-side shape of a report record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReport {
    pub title: String,
    pub artifact_filename: String,
    pub news: JsonValue,
    pub stock: JsonValue,
    pub uploads: JsonValue,
    pub insights: Vec<String>,
    pub summary: Option<String>,
}

/// Metadata of a generated report artifact. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: i64,
    pub title: String,
    pub artifact_filename: String,
    pub news: JsonValue,
    pub stock: JsonValue,
    pub uploads: JsonValue,
    pub insights: Vec<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One notable action (fetch, upload, download, report build).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: i64,
    pub filename: String,
    pub filepath: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}
