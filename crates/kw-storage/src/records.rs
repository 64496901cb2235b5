//! Append-only SQLite tables for history events, uploads and report metadata.
//!
//! Every operation checks a connection out of the pool for its own duration;
//! no write handle is held between calls.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kw_core::{HistoryEvent, NewReport, ReportRecord, UploadRecord};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Filters for listing history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub event_type: Option<String>,
    /// Substring matched against the serialized payload.
    pub query: Option<String>,
    pub limit: i64,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            query: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    event_type: String,
    payload: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: i64,
    filename: String,
    filepath: String,
    size: i64,
    uploaded_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i64,
    title: String,
    artifact_filename: String,
    news: String,
    stock: String,
    uploads: String,
    insights: String,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

impl RecordStore {
    /// Open (creating if missing) the database at `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Single-connection in-memory database; the connection is kept alive for
    /// the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn insert_history(
        &self,
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO history (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(event_type)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        debug!(id, event_type, "history event recorded");
        Ok(id)
    }

    pub async fn list_history(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEvent>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, event_type, payload, created_at FROM history");
        let mut has_where = false;
        if let Some(event_type) = &filter.event_type {
            builder.push(" WHERE event_type = ").push_bind(event_type.clone());
            has_where = true;
        }
        if let Some(query) = &filter.query {
            builder
                .push(if has_where { " AND " } else { " WHERE " })
                .push("payload LIKE ")
                .push_bind(format!("%{query}%"));
        }
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.max(0));

        let rows = builder
            .build_query_as::<HistoryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| HistoryEvent {
                id: row.id,
                event_type: row.event_type,
                // Payloads that are not valid JSON are returned as plain strings.
                payload: serde_json::from_str(&row.payload)
                    .unwrap_or(JsonValue::String(row.payload)),
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn insert_upload(
        &self,
        filename: &str,
        filepath: &str,
        size: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO uploads (filename, filepath, size, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(filename)
        .bind(filepath)
        .bind(size)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let rows: Vec<UploadRow> = sqlx::query_as(
            "SELECT id, filename, filepath, size, uploaded_at FROM uploads ORDER BY uploaded_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| UploadRecord {
                id: row.id,
                filename: row.filename,
                filepath: row.filepath,
                size: row.size,
                uploaded_at: row.uploaded_at,
            })
            .collect())
    }

    pub async fn insert_report(&self, report: &NewReport) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reports (title, artifact_filename, news, stock, uploads, insights, summary, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&report.title)
        .bind(&report.artifact_filename)
        .bind(serde_json::to_string(&report.news)?)
        .bind(serde_json::to_string(&report.stock)?)
        .bind(serde_json::to_string(&report.uploads)?)
        .bind(serde_json::to_string(&report.insights)?)
        .bind(&report.summary)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        debug!(id, artifact = %report.artifact_filename, "report record inserted");
        Ok(id)
    }

    pub async fn list_reports(&self, limit: i64) -> Result<Vec<ReportRecord>, StoreError> {
        let rows: Vec<ReportRow> = sqlx::query_as(
            r#"
            SELECT id, title, artifact_filename, news, stock, uploads, insights, summary, created_at
              FROM reports
             ORDER BY created_at DESC, id DESC
             LIMIT ?1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReportRecord {
                    id: row.id,
                    title: row.title,
                    artifact_filename: row.artifact_filename,
                    news: serde_json::from_str(&row.news)?,
                    stock: serde_json::from_str(&row.stock)?,
                    uploads: serde_json::from_str(&row.uploads)?,
                    insights: serde_json::from_str(&row.insights)?,
                    summary: row.summary,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_report(title: &str) -> NewReport {
        NewReport {
            title: title.to_string(),
            artifact_filename: format!("{title}_1700000000.txt"),
            news: json!([{"title": "A", "url": null, "description": "Markets rose."}]),
            stock: json!({"symbol": "AAPL", "price": "150"}),
            uploads: json!(["q.csv"]),
            insights: vec!["Markets rose.".into()],
            summary: Some("Markets rose.".into()),
        }
    }

    #[tokio::test]
    async fn report_records_round_trip_through_file_database() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        let store = RecordStore::connect(&url).await.expect("connect");

        let id = store.insert_report(&sample_report("Daily_Brief")).await.expect("insert");
        assert!(id > 0);

        let reports = store.list_reports(10).await.expect("list");
        assert_eq!(reports.len(), 1);
        let record = &reports[0];
        assert_eq!(record.title, "Daily_Brief");
        assert_eq!(record.artifact_filename, "Daily_Brief_1700000000.txt");
        assert_eq!(record.stock["symbol"], "AAPL");
        assert_eq!(record.uploads, json!(["q.csv"]));
        assert_eq!(record.insights, vec!["Markets rose.".to_string()]);
        assert!(dir.path().join("app.db").exists());
    }

    #[tokio::test]
    async fn history_filters_by_type_and_payload() {
        let store = RecordStore::in_memory().await.expect("store");
        store
            .insert_history("news_fetch", &json!({"count": 20}))
            .await
            .unwrap();
        store
            .insert_history("file_upload", &json!({"filename": "q.csv", "size": 12}))
            .await
            .unwrap();
        store
            .insert_history("file_download", &json!({"filename": "q.csv"}))
            .await
            .unwrap();

        let all = store.list_history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_type, "file_download");

        let uploads = store
            .list_history(&HistoryFilter {
                event_type: Some("file_upload".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].payload["size"], 12);

        let csv = store
            .list_history(&HistoryFilter {
                query: Some("q.csv".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(csv.len(), 2);

        let both = store
            .list_history(&HistoryFilter {
                event_type: Some("file_download".into()),
                query: Some("q.csv".into()),
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(both.len(), 1);

        let limited = store
            .list_history(&HistoryFilter {
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn uploads_are_listed_newest_first() {
        let store = RecordStore::in_memory().await.expect("store");
        store.insert_upload("a.csv", "/tmp/a.csv", 10).await.unwrap();
        store.insert_upload("b.json", "/tmp/b.json", 20).await.unwrap();

        let uploads = store.list_uploads().await.unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].filename, "b.json");
        assert_eq!(uploads[1].size, 10);
    }

    #[tokio::test]
    async fn closed_store_rejects_writes() {
        let store = RecordStore::in_memory().await.expect("store");
        store.close().await;
        let err = store.insert_report(&sample_report("late")).await;
        assert!(matches!(err, Err(StoreError::Database(_))));
    }
}
