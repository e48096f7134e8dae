//! Pipeline configuration.
//!
//! Every knob has a default matching the published Vilnius datasets. A JSON file
//! may override any subset of fields; the `preprocess` binary then applies its
//! command-line flags on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally::buckets::{AgeBuckets, BucketError, DEFAULT_AGE_BOUNDS};
use tally::split::{DEFAULT_HOLDOUT_PERIODS, DEFAULT_PUBLIC_FRACTION, SplitConfig};

pub const DEFAULT_SNAPSHOT_URL_TEMPLATE: &str =
    "https://raw.githubusercontent.com/vilnius/gyventojai/{revision}/registered_people_n_streets.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid age bounds: {0}")]
    AgeBounds(#[from] BucketError),

    #[error("public_fraction must be within [0, 1], got {0}")]
    PublicFraction(f64),

    #[error("snapshot_url_template must contain {{revision}}: {0}")]
    UrlTemplate(String),

    #[error("{0} must be a single ASCII character")]
    Delimiter(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// URL of one snapshot; `{revision}` is replaced by the manifest commit id.
    pub snapshot_url_template: String,
    /// Ascending age bucket lower bounds.
    pub age_bounds: Vec<i64>,
    /// Group by family status as an extra dimension.
    pub track_family_status: bool,
    pub holdout_periods: u32,
    pub public_fraction: f64,
    /// Seed for the Public/Private draw. Drawn at random when absent.
    pub split_seed: Option<u64>,
    /// Region tag in output file names.
    pub region_tag: String,
    pub snapshot_delimiter: char,
    pub supplementary_delimiter: char,
    pub output_delimiter: char,
    /// Attempts per snapshot download before it is skipped.
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    /// Snapshot downloads in flight at once.
    pub fetch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_url_template: DEFAULT_SNAPSHOT_URL_TEMPLATE.to_string(),
            age_bounds: DEFAULT_AGE_BOUNDS.to_vec(),
            track_family_status: false,
            holdout_periods: DEFAULT_HOLDOUT_PERIODS,
            public_fraction: DEFAULT_PUBLIC_FRACTION,
            split_seed: None,
            region_tag: "VILNIUS".to_string(),
            snapshot_delimiter: ',',
            supplementary_delimiter: ';',
            output_delimiter: ',',
            max_retries: 3,
            request_timeout_secs: 60,
            fetch_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON config. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Checks everything that can be checked before any data is fetched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.age_buckets()?;
        if !(0.0..=1.0).contains(&self.public_fraction) {
            return Err(ConfigError::PublicFraction(self.public_fraction));
        }
        if !self.snapshot_url_template.contains("{revision}") {
            return Err(ConfigError::UrlTemplate(self.snapshot_url_template.clone()));
        }
        delimiter_byte(self.snapshot_delimiter, "snapshot_delimiter")?;
        delimiter_byte(self.supplementary_delimiter, "supplementary_delimiter")?;
        delimiter_byte(self.output_delimiter, "output_delimiter")?;
        Ok(())
    }

    pub fn age_buckets(&self) -> Result<AgeBuckets, ConfigError> {
        Ok(AgeBuckets::new(self.age_bounds.clone())?)
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            holdout_periods: self.holdout_periods,
            public_fraction: self.public_fraction,
            seed: self.split_seed,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn snapshot_url(&self, revision: &str) -> String {
        self.snapshot_url_template.replace("{revision}", revision)
    }
}

/// The `csv` crate takes delimiters as bytes.
pub fn delimiter_byte(c: char, field: &'static str) -> Result<u8, ConfigError> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::Delimiter(field))
    }
}
