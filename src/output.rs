//! Writes the encoded dataset to disk: decoder tables, the fact table, the
//! train/test/solution split, and a `summary.json` describing the run.
//!
//! ```text
//! <output_dir>/
//! ├── district_decoder.csv
//! ├── age_bin_decoder.csv
//! ├── gender_decoder.csv
//! ├── family_status_decoder.csv          (only when family status is tracked)
//! ├── as_of_date_decoder.csv
//! ├── population_VILNIUS_2024-05-01.csv
//! ├── population_train_VILNIUS_2024-05-01.csv
//! ├── population_test_VILNIUS_2024-05-01.csv
//! ├── population_solution_VILNIUS_2024-05-01.csv
//! └── summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tally::common::{FactKey, FactRow, YearMonth};
use tally::encode::{Decoders, Dictionary};
use tally::split::{SolutionRow, TestRow};

use crate::pipeline::{PipelineOutput, RunReport};

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("JSON error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{}: malformed decoder row {row}", .path.display())]
    MalformedDecoder { path: PathBuf, row: usize },
}

// ============================================================================
// Paths
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutputPaths {
    dir: PathBuf,
    region_tag: String,
    run_date: NaiveDate,
}

impl OutputPaths {
    pub fn new(dir: impl Into<PathBuf>, region_tag: &str, run_date: NaiveDate) -> Self {
        Self {
            dir: dir.into(),
            region_tag: region_tag.to_string(),
            run_date,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `age_bin` → `<dir>/age_bin_decoder.csv`.
    pub fn decoder(&self, dimension: &str) -> PathBuf {
        self.dir.join(format!("{dimension}_decoder.csv"))
    }

    fn population(&self, part: Option<&str>) -> PathBuf {
        let name = match part {
            Some(part) => format!("population_{part}_{}_{}.csv", self.region_tag, self.run_date),
            None => format!("population_{}_{}.csv", self.region_tag, self.run_date),
        };
        self.dir.join(name)
    }

    pub fn facts(&self) -> PathBuf {
        self.population(None)
    }

    pub fn train(&self) -> PathBuf {
        self.population(Some("train"))
    }

    pub fn test(&self) -> PathBuf {
        self.population(Some("test"))
    }

    pub fn solution(&self) -> PathBuf {
        self.population(Some("solution"))
    }

    pub fn summary(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub region_tag: String,
    pub run_date: String,
    pub first_month: Option<YearMonth>,
    pub last_month: Option<YearMonth>,
    /// Number of distinct values per dimension, in column order.
    pub dimensions: IndexMap<String, usize>,
    pub fact_rows: usize,
    pub duplicates_removed: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub public_rows: usize,
    pub private_rows: usize,
    pub cutoff: i64,
    pub seed: u64,
    pub report: RunReport,
    /// File names relative to the output directory.
    pub files: Vec<String>,
}

impl Summary {
    pub fn load(path: &Path) -> Result<Self, OutputError> {
        let text = fs::read_to_string(path).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| OutputError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn save(&self, path: &Path) -> Result<(), OutputError> {
        let json_err = |source| OutputError::Json {
            path: path.to_path_buf(),
            source,
        };
        let text = serde_json::to_string_pretty(self).map_err(json_err)?;
        fs::write(path, text).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Writing
// ============================================================================

struct TableWriter {
    path: PathBuf,
    inner: csv::Writer<fs::File>,
}

impl TableWriter {
    fn create(path: PathBuf, delimiter: u8, header: &[&str]) -> Result<Self, OutputError> {
        let inner = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&path)
            .map_err(|source| OutputError::Csv {
                path: path.clone(),
                source,
            })?;
        let mut writer = Self { path, inner };
        writer.write(header)?;
        Ok(writer)
    }

    fn write<I, T>(&mut self, record: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.inner
            .write_record(record)
            .map_err(|source| OutputError::Csv {
                path: self.path.clone(),
                source,
            })
    }

    fn finish(mut self) -> Result<PathBuf, OutputError> {
        self.inner.flush().map_err(|source| OutputError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.path)
    }
}

fn key_header(tracks_family_status: bool) -> Vec<&'static str> {
    let mut header = vec!["district_id", "age_bin_id", "gender_id"];
    if tracks_family_status {
        header.push("family_status_id");
    }
    header.push("as_of_date_id");
    header
}

fn key_fields(key: &FactKey) -> Vec<String> {
    let mut fields = vec![
        key.district_id.0.to_string(),
        key.age_bucket_id.0.to_string(),
        key.gender_id.0.to_string(),
    ];
    if let Some(family_status_id) = key.family_status_id {
        fields.push(family_status_id.0.to_string());
    }
    fields.push(key.as_of_date_id.0.to_string());
    fields
}

fn write_dictionary(
    path: PathBuf,
    dimension: &str,
    dict: &Dictionary<String>,
    delimiter: u8,
) -> Result<PathBuf, OutputError> {
    let id_column = format!("{dimension}_id");
    let mut writer = TableWriter::create(path, delimiter, &[id_column.as_str(), dimension])?;
    for (id, value) in dict.iter() {
        writer.write([id.to_string().as_str(), value.as_str()])?;
    }
    writer.finish()
}

/// Writes one decoder table per dimension. The date decoder lists every
/// calendar month, including months no snapshot covered.
pub fn write_decoders(
    paths: &OutputPaths,
    decoders: &Decoders,
    delimiter: u8,
) -> Result<Vec<PathBuf>, OutputError> {
    let mut written = Vec::new();
    for (dimension, dict) in [
        ("district", &decoders.districts),
        ("age_bin", &decoders.age_buckets),
        ("gender", &decoders.genders),
    ] {
        written.push(write_dictionary(paths.decoder(dimension), dimension, dict, delimiter)?);
    }
    if let Some(dict) = &decoders.family_statuses {
        written.push(write_dictionary(
            paths.decoder("family_status"),
            "family_status",
            dict,
            delimiter,
        )?);
    }

    let mut writer = TableWriter::create(
        paths.decoder("as_of_date"),
        delimiter,
        &["as_of_date_id", "as_of_date"],
    )?;
    for (id, month) in decoders.calendar.iter() {
        writer.write([id.0.to_string(), month.to_string()])?;
    }
    written.push(writer.finish()?);
    Ok(written)
}

/// Fact and train tables share the layout: keys then `count`.
pub fn write_fact_rows(
    path: PathBuf,
    rows: &[FactRow],
    tracks_family_status: bool,
    delimiter: u8,
) -> Result<PathBuf, OutputError> {
    let mut header = key_header(tracks_family_status);
    header.push("count");
    let mut writer = TableWriter::create(path, delimiter, &header)?;
    for row in rows {
        let mut fields = key_fields(&row.key);
        fields.push(row.count.to_string());
        writer.write(&fields)?;
    }
    writer.finish()
}

pub fn write_test_rows(
    path: PathBuf,
    rows: &[TestRow],
    tracks_family_status: bool,
    delimiter: u8,
) -> Result<PathBuf, OutputError> {
    let mut header = vec!["ID"];
    header.extend(key_header(tracks_family_status));
    let mut writer = TableWriter::create(path, delimiter, &header)?;
    for row in rows {
        let mut fields = vec![row.id.0.to_string()];
        fields.extend(key_fields(&row.key));
        writer.write(&fields)?;
    }
    writer.finish()
}

pub fn write_solution_rows(
    path: PathBuf,
    rows: &[SolutionRow],
    tracks_family_status: bool,
    delimiter: u8,
) -> Result<PathBuf, OutputError> {
    let mut header = vec!["ID"];
    header.extend(key_header(tracks_family_status));
    header.extend(["count", "Usage"]);
    let mut writer = TableWriter::create(path, delimiter, &header)?;
    for row in rows {
        let mut fields = vec![row.id.0.to_string()];
        fields.extend(key_fields(&row.key));
        fields.push(row.count.to_string());
        fields.push(row.usage.to_string());
        writer.write(&fields)?;
    }
    writer.finish()
}

/// Writes every output file and returns the summary that was saved alongside.
pub fn write_outputs(
    paths: &OutputPaths,
    output: &PipelineOutput,
    report: &RunReport,
    delimiter: u8,
) -> Result<Summary, OutputError> {
    fs::create_dir_all(paths.dir()).map_err(|source| OutputError::Io {
        path: paths.dir().to_path_buf(),
        source,
    })?;

    let decoders = &output.decoders;
    let split = &output.split;
    let tracks_family_status = decoders.family_statuses.is_some();

    let mut written = write_decoders(paths, decoders, delimiter)?;
    written.push(write_fact_rows(
        paths.facts(),
        output.facts.rows(),
        tracks_family_status,
        delimiter,
    )?);
    written.push(write_fact_rows(
        paths.train(),
        &split.train,
        tracks_family_status,
        delimiter,
    )?);
    written.push(write_test_rows(
        paths.test(),
        &split.test,
        tracks_family_status,
        delimiter,
    )?);
    written.push(write_solution_rows(
        paths.solution(),
        &split.solution,
        tracks_family_status,
        delimiter,
    )?);

    let mut dimensions = IndexMap::new();
    dimensions.insert("district".to_string(), decoders.districts.len());
    dimensions.insert("age_bin".to_string(), decoders.age_buckets.len());
    dimensions.insert("gender".to_string(), decoders.genders.len());
    if let Some(dict) = &decoders.family_statuses {
        dimensions.insert("family_status".to_string(), dict.len());
    }
    dimensions.insert("as_of_date".to_string(), decoders.calendar.len());

    let public_rows = split.public_rows();
    let summary_path = paths.summary();
    written.push(summary_path.clone());
    let summary = Summary {
        region_tag: paths.region_tag.clone(),
        run_date: paths.run_date.to_string(),
        first_month: decoders.calendar.first(),
        last_month: decoders.calendar.last(),
        dimensions,
        fact_rows: output.facts.len(),
        duplicates_removed: output.facts.duplicates_removed(),
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        public_rows,
        private_rows: split.solution.len() - public_rows,
        cutoff: split.cutoff,
        seed: split.seed,
        report: report.clone(),
        files: written
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    summary.save(&summary_path)?;
    debug!("Wrote {} files to {}", summary.files.len(), paths.dir().display());
    Ok(summary)
}

/// Reads a two-column `id,value` decoder table.
pub fn read_decoder(path: &Path, delimiter: u8) -> Result<Vec<(u32, String)>, OutputError> {
    let csv_err = |source| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(csv_err)?;

    let mut entries = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result.map_err(csv_err)?;
        let malformed = || OutputError::MalformedDecoder {
            path: path.to_path_buf(),
            row,
        };
        let id = record
            .get(0)
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let value = record.get(1).ok_or_else(malformed)?;
        entries.push((id, value.to_string()));
    }
    Ok(entries)
}
