//! Preprocessor binary: turns historical resident registry snapshots into an
//! encoded population count dataset with a temporal train/test split.
//!
//! ## Input
//!
//! - `--manifest <file>`: CSV of `commit,datetime` rows. Each commit is one
//!   snapshot, fetched over HTTP (or from `--snapshot-dir` when given).
//! - `--supplementary-dir <dir>`: `;`-delimited extracts named `GYV_YYYYMM.csv`.
//!
//! At least one of the two is required.
//!
//! ## Output
//!
//! Written to `--output-dir`:
//! - `{district,age_bin,gender,as_of_date}_decoder.csv` (+ `family_status` when tracked)
//! - `population_{REGION}_{RUNDATE}.csv`         : the full fact table
//! - `population_train_{REGION}_{RUNDATE}.csv`   : facts before the cutoff
//! - `population_test_{REGION}_{RUNDATE}.csv`    : held-out keys, no counts
//! - `population_solution_{REGION}_{RUNDATE}.csv`: held-out counts with `Usage`
//! - `summary.json`                              : run report, cutoff, and seed
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin preprocess -- \
//!     --manifest data/commits.csv --supplementary-dir data/extracts --output-dir out
//! ```

use std::path::PathBuf;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use clap::{ArgGroup, Parser};
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use tracing::{info, warn};

use census::config::{PipelineConfig, delimiter_byte};
use census::manifest::{discover_supplementary, load_manifest};
use census::output::{OutputPaths, write_outputs};
use census::pipeline::{Collector, collect_snapshots, collect_supplementary, finalize};
use census::source::{DirectorySnapshotSource, HttpSnapshotSource};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(about = "Aggregate resident registry snapshots into an encoded population dataset")]
#[command(group(
    ArgGroup::new("inputs")
        .required(true)
        .multiple(true)
        .args(["manifest", "supplementary_dir"])
))]
struct Args {
    /// Snapshot manifest (CSV with `commit,datetime` columns).
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Directory of supplementary `GYV_YYYYMM.csv` extracts.
    #[arg(long)]
    supplementary_dir: Option<PathBuf>,

    /// Read snapshots from `<dir>/<commit>.csv` instead of downloading them.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Where the output tables are written.
    #[arg(long)]
    output_dir: PathBuf,

    /// JSON pipeline config. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the Public/Private draw.
    #[arg(long)]
    seed: Option<u64>,

    /// Months held out for the test set.
    #[arg(long)]
    holdout_periods: Option<u32>,

    /// Group by family status as an extra dimension.
    #[arg(long, default_value_t = false)]
    track_family_status: bool,

    /// Region tag used in output file names.
    #[arg(long)]
    region_tag: Option<String>,

    /// Run date used in output file names (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    run_date: Option<NaiveDate>,
}

impl Args {
    fn resolve_config(&self) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.split_seed = Some(seed);
        }
        if let Some(holdout) = self.holdout_periods {
            config.holdout_periods = holdout;
        }
        if self.track_family_status {
            config.track_family_status = true;
        }
        if let Some(tag) = &self.region_tag {
            config.region_tag = tag.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn progress_bar(len: usize, template: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(ProgressStyle::with_template(template)?.progress_chars("##-"));
    Ok(pb)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;
    let run_date = args.run_date.unwrap_or_else(|| Local::now().date_naive());
    let paths = OutputPaths::new(&args.output_dir, &config.region_tag, run_date);

    if let Some(manifest) = &args.manifest {
        info!("Manifest:      {}", manifest.display());
    }
    if let Some(dir) = &args.supplementary_dir {
        info!("Supplementary: {}", dir.display());
    }
    info!("Output:        {}", paths.dir().display());
    info!(
        "Age bounds {:?}, holdout {} months, family status {}",
        config.age_bounds,
        config.holdout_periods,
        if config.track_family_status { "tracked" } else { "ignored" }
    );

    let pipeline_start = Instant::now();
    let mut collector = Collector::new(config.age_buckets()?, config.track_family_status);

    // ── Step 1: Snapshots ────────────────────────────────────────────────
    if let Some(manifest) = &args.manifest {
        info!("Step 1: Ingesting registry snapshots...");
        let entries = load_manifest(manifest)?;
        info!("  Found {} snapshots", entries.len());

        let delimiter = delimiter_byte(config.snapshot_delimiter, "snapshot_delimiter")?;
        let pb = progress_bar(
            entries.len(),
            "  Fetching   {bar:40.cyan/blue} {pos}/{len} snapshots [{elapsed_precise}]",
        )?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        match &args.snapshot_dir {
            Some(dir) => {
                info!("  Reading snapshots from {}", dir.display());
                let source = DirectorySnapshotSource::new(dir);
                rt.block_on(collect_snapshots(
                    &source,
                    &entries,
                    &mut collector,
                    delimiter,
                    config.fetch_concurrency,
                    &pb,
                ));
            }
            None => {
                let source = HttpSnapshotSource::new(&config)?;
                rt.block_on(collect_snapshots(
                    &source,
                    &entries,
                    &mut collector,
                    delimiter,
                    config.fetch_concurrency,
                    &pb,
                ));
            }
        }
        pb.finish_and_clear();
        info!(
            "  {} counts from {} rows",
            HumanCount(collector.num_counts() as u64),
            HumanCount(collector.report().rows_read as u64)
        );
    }

    // ── Step 2: Supplementary extracts ───────────────────────────────────
    if let Some(dir) = &args.supplementary_dir {
        info!("Step 2: Ingesting supplementary extracts...");
        let extracts = discover_supplementary(dir)?;
        info!("  Found {} extracts", extracts.len());

        let delimiter = delimiter_byte(config.supplementary_delimiter, "supplementary_delimiter")?;
        let pb = progress_bar(
            extracts.len(),
            "  Reading    {bar:40.cyan/blue} {pos}/{len} extracts [{elapsed_precise}]",
        )?;
        collect_supplementary(&extracts, &mut collector, delimiter, &pb);
        pb.finish_and_clear();
    }

    let (counts, report) = collector.finish();
    if !report.inputs_superseded.is_empty() {
        info!(
            "  {} inputs replaced by a later input for the same month",
            report.inputs_superseded.len()
        );
    }
    if !report.inputs_skipped.is_empty() {
        warn!("  Skipped {} inputs:", report.inputs_skipped.len());
        for skipped in &report.inputs_skipped {
            warn!("    {}: {}", skipped.name, skipped.reason);
        }
    }

    // ── Step 3: Encode, validate, split ──────────────────────────────────
    info!("Step 3: Encoding {} aggregated counts...", HumanCount(counts.len() as u64));
    let output = finalize(&counts, &config.split_config())?;

    // ── Step 4: Write ────────────────────────────────────────────────────
    info!("Step 4: Writing outputs...");
    let delimiter = delimiter_byte(config.output_delimiter, "output_delimiter")?;
    let summary = write_outputs(&paths, &output, &report, delimiter)?;

    let elapsed = pipeline_start.elapsed();
    info!("Preprocessing complete in {}!", HumanDuration(elapsed));
    info!("  Output directory: {}", paths.dir().display());
    info!(
        "  Inputs: {} aggregated, {} superseded, {} not applicable, {} skipped",
        report.inputs_aggregated,
        report.inputs_superseded.len(),
        report.inputs_not_applicable.len(),
        report.inputs_skipped.len()
    );
    info!("  Rows read: {}", HumanCount(report.rows_read as u64));
    info!(
        "  Months: {} ({} to {})",
        output.decoders.calendar.len(),
        summary
            .first_month
            .map(|m| m.to_string())
            .unwrap_or_default(),
        summary.last_month.map(|m| m.to_string()).unwrap_or_default()
    );
    info!(
        "  Fact rows: {}, train: {}, test: {} ({} public)",
        HumanCount(summary.fact_rows as u64),
        HumanCount(summary.train_rows as u64),
        HumanCount(summary.test_rows as u64),
        HumanCount(summary.public_rows as u64)
    );
    info!("  Split seed: {}", summary.seed);

    Ok(())
}
