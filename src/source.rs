//! Raw snapshot retrieval and CSV parsing into [`RawBatch`]es.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::sleep;

use tally::schema::RawBatch;

use crate::config::PipelineConfig;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
}

impl SourceError {
    /// Client errors (a revision that does not exist) will not go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(_) => true,
            SourceError::Status { status, .. } => !status.is_client_error(),
            SourceError::Io { .. } | SourceError::Csv(_) => false,
        }
    }
}

pub trait SnapshotSource {
    /// Returns the raw bytes of the snapshot at `revision`.
    fn fetch(&self, revision: &str) -> impl Future<Output = Result<Vec<u8>, SourceError>> + Send;

    /// Human-readable location of `revision`, for logs.
    fn describe(&self, revision: &str) -> String;
}

// ============================================================================
// HTTP
// ============================================================================

/// Downloads snapshots from a URL template with bounded, jittered retries.
pub struct HttpSnapshotSource {
    client: Client,
    url_template: String,
    max_retries: u32,
}

impl HttpSnapshotSource {
    pub fn new(config: &PipelineConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url_template: config.snapshot_url_template.clone(),
            max_retries: config.max_retries.max(1),
        })
    }

    fn url(&self, revision: &str) -> String {
        self.url_template.replace("{revision}", revision)
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, revision: &str) -> Result<Vec<u8>, SourceError> {
        let url = self.url(revision);
        let mut current_attempt = 0;
        let mut current_backoff = Duration::from_millis(500);
        let max_backoff = Duration::from_secs(10);

        loop {
            match self.fetch_once(&url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    current_attempt += 1;
                    if current_attempt >= self.max_retries || !e.is_transient() {
                        return Err(e);
                    }

                    let jitter: f64 = rand::rng().random_range(0.5..1.5);
                    let jittered = current_backoff.mul_f64(jitter);

                    tracing::debug!(
                        "Fetch of {} failed (attempt {}/{}), retrying in {}ms: {}",
                        revision,
                        current_attempt,
                        self.max_retries,
                        jittered.as_millis(),
                        e
                    );
                    sleep(jittered).await;
                    current_backoff = std::cmp::min(current_backoff * 2, max_backoff);
                }
            }
        }
    }

    fn describe(&self, revision: &str) -> String {
        self.url(revision)
    }
}

// ============================================================================
// Local directory
// ============================================================================

/// Reads `<dir>/<revision>.csv`, for offline runs against previously downloaded snapshots.
pub struct DirectorySnapshotSource {
    dir: PathBuf,
}

impl DirectorySnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, revision: &str) -> PathBuf {
        self.dir.join(format!("{revision}.csv"))
    }
}

impl SnapshotSource for DirectorySnapshotSource {
    async fn fetch(&self, revision: &str) -> Result<Vec<u8>, SourceError> {
        read_file(&self.path(revision))
    }

    fn describe(&self, revision: &str) -> String {
        self.path(revision).display().to_string()
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, SourceError> {
    std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug)]
pub struct ParsedBatch {
    pub batch: RawBatch,
    /// Lines dropped for having more fields than the header, or invalid UTF-8.
    pub malformed_rows: usize,
}

/// Parses delimited text with a header row.
///
/// Lines longer than the header and lines that are not valid UTF-8 are skipped.
/// Short lines are kept; their missing trailing cells read as null.
pub fn parse_batch(bytes: &[u8], delimiter: u8) -> Result<ParsedBatch, SourceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let width = headers.len();
    let mut batch = RawBatch::new(headers);
    let mut malformed_rows = 0;

    for result in rdr.records() {
        match result {
            Ok(record) if record.len() <= width => {
                batch.push_row(record.iter().map(str::to_string).collect());
            }
            Ok(_) => malformed_rows += 1,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => malformed_rows += 1,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(ParsedBatch {
        batch,
        malformed_rows,
    })
}
