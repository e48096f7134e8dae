//! What to ingest: the snapshot manifest and the supplementary extract directory.
//!
//! ## Manifest
//!
//! A CSV file with one row per snapshot of the registry repository:
//!
//! ```text
//! commit,datetime
//! 3f1c2e9,2019-06-03 10:15:00
//! 8a77b01,2019-07-01T08:00:00+03:00
//! ```
//!
//! The commit id addresses the snapshot; the datetime is its as-of date.
//!
//! ## Supplementary extracts
//!
//! A directory of `;`-delimited extracts named after the period they describe,
//! e.g. `GYV_202103.csv`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use tally::common::YearMonth;

const SUPPLEMENTARY_PREFIX: &str = "GYV_";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
}

#[derive(Deserialize, Debug)]
struct RawManifestRow {
    commit: String,
    datetime: String,
}

/// One snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub revision: String,
    pub observed_at: NaiveDateTime,
}

impl ManifestEntry {
    pub fn as_of(&self) -> YearMonth {
        YearMonth::of(self.observed_at.date())
    }
}

/// Reads the manifest, oldest snapshot first. Rows whose datetime does not
/// parse are logged and skipped. Equal timestamps keep their file order.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let csv_err = |source| ManifestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut entries = Vec::new();
    for (line, result) in rdr.deserialize::<RawManifestRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("  Manifest line {}: {}, skipping", line + 2, e);
                continue;
            }
        };
        match parse_timestamp(&row.datetime) {
            Some(observed_at) => entries.push(ManifestEntry {
                revision: row.commit,
                observed_at,
            }),
            None => warn!(
                "  Manifest line {}: unparseable datetime '{}' for commit {}, skipping",
                line + 2,
                row.datetime,
                row.commit
            ),
        }
    }
    entries.sort_by_key(|e| e.observed_at);
    Ok(entries)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A supplementary extract file and the period embedded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplementaryExtract {
    pub path: PathBuf,
    pub period: YearMonth,
}

/// Lists supplementary extracts in period order. Files without a period token
/// are logged and ignored.
pub fn discover_supplementary(dir: &Path) -> Result<Vec<SupplementaryExtract>, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut extracts = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match period_from_file_name(name) {
            Some(period) => extracts.push(SupplementaryExtract { path, period }),
            None => warn!("  No YYYYMM period in file name {name}, ignoring"),
        }
    }
    extracts.sort_by(|a, b| (a.period, &a.path).cmp(&(b.period, &b.path)));
    Ok(extracts)
}

/// `GYV_202103.csv` → 2021-03. Without the `GYV_` prefix, the first valid
/// six-digit run in the stem is used.
pub fn period_from_file_name(name: &str) -> Option<YearMonth> {
    let stem = name.split('.').next().unwrap_or(name);
    let tail = match stem.find(SUPPLEMENTARY_PREFIX) {
        Some(pos) => &stem[pos + SUPPLEMENTARY_PREFIX.len()..],
        None => stem,
    };
    let bytes = tail.as_bytes();
    (0..bytes.len().saturating_sub(5))
        .filter(|&i| bytes[i..i + 6].iter().all(u8::is_ascii_digit))
        .find_map(|i| YearMonth::from_compact(&tail[i..i + 6]))
}
