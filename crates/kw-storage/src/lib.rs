//! Record store, report artifact files and the outbound HTTP client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, Instrument};

pub mod records;

pub use records::{HistoryFilter, RecordStore, StoreError};

pub const CRATE_NAME: &str = "kw-storage";

/// Attempts at finding a free `{stem}_{n}` name before giving up.
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// File stem actually used, including any collision suffix.
    pub stem: String,
    pub filename: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// Flat directory of generated artifacts served under a public prefix.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Write bytes to `{stem}.{ext}` without ever replacing an existing file.
    /// A taken name is retried as `{stem}_1.{ext}`, `{stem}_2.{ext}`, and so on.
    pub async fn write_new(
        &self,
        stem: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating artifact directory {}", self.root.display()))?;

        let ext = normalize_extension(extension);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                stem.to_string()
            } else {
                format!("{stem}_{attempt}")
            };
            if let Some(stored) = self.try_create(&candidate, ext, bytes).await? {
                return Ok(stored);
            }
        }
        bail!("no free artifact name for {stem}.{ext} in {}", self.root.display())
    }

    /// Write bytes to exactly `{stem}.{ext}`; fails if the file already exists.
    pub async fn write_exact(
        &self,
        stem: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating artifact directory {}", self.root.display()))?;

        let ext = normalize_extension(extension);
        match self.try_create(stem, ext, bytes).await? {
            Some(stored) => Ok(stored),
            None => bail!("artifact {stem}.{ext} already exists"),
        }
    }

    pub async fn remove(&self, filename: &str) {
        let path = self.path_for(filename);
        if let Err(err) = fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), error = %err, "artifact removal skipped");
        }
    }

    async fn try_create(
        &self,
        stem: &str,
        ext: &str,
        bytes: &[u8],
    ) -> anyhow::Result<Option<StoredArtifact>> {
        let filename = format!("{stem}.{ext}");
        let absolute_path = self.root.join(&filename);

        let mut file = match fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&absolute_path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("opening artifact file {}", absolute_path.display()))
            }
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&absolute_path).await;
            return Err(err)
                .with_context(|| format!("writing artifact file {}", absolute_path.display()));
        }

        Ok(Some(StoredArtifact {
            stem: stem.to_string(),
            filename,
            absolute_path,
            byte_size: bytes.len(),
        }))
    }
}

fn normalize_extension(extension: &str) -> &str {
    let ext = extension.trim_start_matches('.').trim();
    if ext.is_empty() {
        "bin"
    } else {
        ext
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedJson {
    pub status: StatusCode,
    pub final_url: String,
    pub body: JsonValue,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Single shared client; every request carries the configured timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET a JSON document. Error statuses still yield the body when it parses
    /// as JSON, since providers report API errors inside the payload.
    pub async fn get_json(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedJson, FetchError> {
        let request = async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let bytes = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, final_url, bytes))
        };
        let (status, final_url, bytes) = request
            .instrument(info_span!("http_fetch", source_id, url))
            .await?;

        match serde_json::from_slice::<JsonValue>(&bytes) {
            Ok(body) => Ok(FetchedJson {
                status,
                final_url,
                body,
            }),
            Err(_) if !status.is_success() => Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            }),
            Err(source) => Err(FetchError::Decode {
                url: final_url,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_new_never_overwrites_existing_artifacts() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("reports"));

        let first = store
            .write_new("Daily_Brief_1700000000", "txt", b"first")
            .await
            .expect("first write");
        let second = store
            .write_new("Daily_Brief_1700000000", "txt", b"second")
            .await
            .expect("second write");

        assert_eq!(first.filename, "Daily_Brief_1700000000.txt");
        assert_eq!(second.filename, "Daily_Brief_1700000000_1.txt");
        assert_eq!(second.stem, "Daily_Brief_1700000000_1");
        assert_eq!(std::fs::read_to_string(&first.absolute_path).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&second.absolute_path).unwrap(), "second");
    }

    #[tokio::test]
    async fn write_exact_rejects_taken_names() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());

        store.write_exact("report_1", ".pdf", b"%PDF").await.expect("first");
        let err = store.write_exact("report_1", ".pdf", b"%PDF").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn remove_deletes_artifact() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let stored = store.write_new("gone", "txt", b"x").await.expect("write");
        store.remove(&stored.filename).await;
        assert!(!stored.absolute_path.exists());
        store.remove("never-existed.txt").await;
    }

    #[test]
    fn blank_extension_falls_back_to_bin() {
        assert_eq!(normalize_extension(""), "bin");
        assert_eq!(normalize_extension(".json"), "json");
    }
}
