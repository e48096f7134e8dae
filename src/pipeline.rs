//! Ingestion with per-input failure isolation, followed by the global finalize
//! step (encode, validate, split).
//!
//! Each snapshot and supplementary extract is parsed, adapted, and aggregated on
//! its own. A failure in one of them is logged, recorded in the [`RunReport`],
//! and does not affect the others. Only after every input has been seen does
//! [`finalize`] run over the unioned counts.
//!
//! Each as-of month holds the counts of exactly one input. When a later input
//! describes a month that is already filled (two commits in one month, or a
//! commit and a `GYV_YYYYMM` extract), the later input replaces the earlier one
//! and the replacement is recorded in [`RunReport::inputs_superseded`].

use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use tally::aggregate::aggregate;
use tally::buckets::AgeBuckets;
use tally::common::{AggregatedCount, YearMonth};
use tally::encode::{Decoders, EncodeError, encode};
use tally::schema::{SchemaError, adapt};
use tally::split::{DatasetSplit, SplitConfig, split_dataset};
use tally::validate::{FactTable, ValidationError};

use crate::config::ConfigError;
use crate::manifest::{ManifestEntry, ManifestError, SupplementaryExtract};
use crate::output::OutputError;
use crate::source::{SnapshotSource, SourceError, parse_batch, read_file};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("fact table failed uniqueness validation: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInput {
    pub name: String,
    pub reason: String,
}

/// An input whose counts were replaced by a later input for the same month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersededInput {
    pub name: String,
    pub as_of: YearMonth,
    pub superseded_by: String,
}

/// What happened to every input of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub inputs_aggregated: usize,
    /// Inputs without any district column. They contribute no rows.
    pub inputs_not_applicable: Vec<String>,
    pub inputs_skipped: Vec<SkippedInput>,
    pub inputs_superseded: Vec<SupersededInput>,
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub rows_dropped_null_district: usize,
    pub rows_dropped_null_gender: usize,
    pub rows_missing_age: usize,
    /// Counts retained after superseded inputs were dropped.
    pub aggregated_counts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Number of aggregated count rows the input contributed.
    Aggregated(usize),
    NotApplicable,
}

// ============================================================================
// Collector
// ============================================================================

struct MonthCounts {
    input: String,
    counts: Vec<AggregatedCount>,
}

/// Accumulates aggregated counts across inputs, one input per as-of month.
pub struct Collector {
    buckets: AgeBuckets,
    track_family_status: bool,
    months: IndexMap<YearMonth, MonthCounts>,
    report: RunReport,
}

impl Collector {
    pub fn new(buckets: AgeBuckets, track_family_status: bool) -> Self {
        Self {
            buckets,
            track_family_status,
            months: IndexMap::new(),
            report: RunReport::default(),
        }
    }

    /// Parses, adapts, and aggregates one input. Nothing is recorded on error;
    /// callers go through [`Collector::ingest_or_skip`] to get failure isolation.
    pub fn ingest(
        &mut self,
        name: &str,
        as_of: YearMonth,
        bytes: &[u8],
        delimiter: u8,
    ) -> Result<IngestOutcome, PipelineError> {
        let parsed = parse_batch(bytes, delimiter)?;
        let Some(projection) = adapt(&parsed.batch, as_of.year(), self.track_family_status)?
        else {
            self.report.inputs_not_applicable.push(name.to_string());
            return Ok(IngestOutcome::NotApplicable);
        };

        let stats = projection.stats;
        let counts = aggregate(projection.records, as_of, &self.buckets);
        let produced = counts.len();
        debug!(
            "{}: {} rows -> {} counts ({:?})",
            name, stats.rows_read, produced, projection.layout
        );

        self.report.inputs_aggregated += 1;
        self.report.rows_read += stats.rows_read;
        self.report.malformed_rows += parsed.malformed_rows;
        self.report.rows_dropped_null_district += stats.dropped_null_district;
        self.report.rows_dropped_null_gender += stats.dropped_null_gender;
        self.report.rows_missing_age += stats.missing_age;
        self.report.aggregated_counts += produced;

        // Replacing keeps the month's original position, so ids stay in first-seen order.
        let previous = self.months.insert(
            as_of,
            MonthCounts {
                input: name.to_string(),
                counts,
            },
        );
        if let Some(previous) = previous {
            warn!("  {name} supersedes {} for {as_of}", previous.input);
            self.report.aggregated_counts -= previous.counts.len();
            self.report.inputs_superseded.push(SupersededInput {
                name: previous.input,
                as_of,
                superseded_by: name.to_string(),
            });
        }
        Ok(IngestOutcome::Aggregated(produced))
    }

    /// Like [`Collector::ingest`], but a failure is logged and recorded instead of returned.
    pub fn ingest_or_skip(
        &mut self,
        name: &str,
        as_of: YearMonth,
        bytes: Result<Vec<u8>, SourceError>,
        delimiter: u8,
    ) -> Option<IngestOutcome> {
        let result = bytes
            .map_err(PipelineError::from)
            .and_then(|bytes| self.ingest(name, as_of, &bytes, delimiter));
        match result {
            Ok(IngestOutcome::NotApplicable) => {
                warn!("  {name}: no district column, not applicable");
                Some(IngestOutcome::NotApplicable)
            }
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("  Error processing {name}: {e}");
                self.report.inputs_skipped.push(SkippedInput {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    /// Retained counts, month by month in first-seen month order.
    pub fn counts(&self) -> impl Iterator<Item = &AggregatedCount> {
        self.months.values().flat_map(|m| m.counts.iter())
    }

    pub fn num_counts(&self) -> usize {
        self.months.values().map(|m| m.counts.len()).sum()
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn finish(self) -> (Vec<AggregatedCount>, RunReport) {
        let counts = self
            .months
            .into_values()
            .flat_map(|m| m.counts)
            .collect();
        (counts, self.report)
    }
}

/// Fetches every manifest snapshot and feeds it to the collector in manifest order.
///
/// Up to `concurrency` downloads are in flight; results are still consumed in order.
pub async fn collect_snapshots<S: SnapshotSource>(
    source: &S,
    entries: &[ManifestEntry],
    collector: &mut Collector,
    delimiter: u8,
    concurrency: usize,
    progress: &ProgressBar,
) {
    let mut fetched = stream::iter(entries.iter())
        .map(|entry| async move { (entry, source.fetch(&entry.revision).await) })
        .buffered(concurrency.max(1));

    while let Some((entry, bytes)) = fetched.next().await {
        let name = format!("commit {}", entry.revision);
        if let Err(e) = &bytes {
            debug!("  Fetch of {} failed: {}", source.describe(&entry.revision), e);
        }
        collector.ingest_or_skip(&name, entry.as_of(), bytes, delimiter);
        progress.inc(1);
    }
}

/// Reads and ingests supplementary extracts in the order given.
pub fn collect_supplementary(
    extracts: &[SupplementaryExtract],
    collector: &mut Collector,
    delimiter: u8,
    progress: &ProgressBar,
) {
    for extract in extracts {
        let name = extract.path.display().to_string();
        collector.ingest_or_skip(&name, extract.period, read_file(&extract.path), delimiter);
        progress.inc(1);
    }
}

// ============================================================================
// Finalize
// ============================================================================

pub struct PipelineOutput {
    pub decoders: Decoders,
    pub facts: FactTable,
    pub split: DatasetSplit,
}

/// Encodes the unioned counts, validates key uniqueness, and splits train/test.
pub fn finalize(
    counts: &[AggregatedCount],
    split_config: &SplitConfig,
) -> Result<PipelineOutput, PipelineError> {
    let encoded = encode(counts)?;
    let decoders = encoded.decoders;
    info!(
        "  {} districts, {} age buckets, {} genders, {} months",
        decoders.districts.len(),
        decoders.age_buckets.len(),
        decoders.genders.len(),
        decoders.calendar.len()
    );

    let facts = FactTable::from_rows(encoded.rows)?;
    if facts.duplicates_removed() > 0 {
        info!("  Dropped {} exact duplicate rows", facts.duplicates_removed());
    }

    let split = split_dataset(&facts, split_config);
    info!(
        "  Cutoff as_of_date_id {}: {} train rows, {} test rows ({} public), seed {}",
        split.cutoff,
        split.train.len(),
        split.test.len(),
        split.public_rows(),
        split.seed
    );

    Ok(PipelineOutput {
        decoders,
        facts,
        split,
    })
}
