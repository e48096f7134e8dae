//! Inspect a preprocessed output directory: run summary, decoder tables, and
//! sample rows of every population table, in a human-readable format.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin inspect -- --output-dir out
//! cargo run --release --bin inspect -- --output-dir out --sample-rows 10
//! ```

use std::path::PathBuf;

use clap::Parser;
use indicatif::HumanCount;

use census::config::delimiter_byte;
use census::output::{SUMMARY_FILE, Summary, read_decoder};

#[derive(Parser, Debug)]
#[command(about = "Inspect a preprocessed population dataset")]
struct Args {
    /// Directory written by `preprocess`.
    #[arg(long)]
    output_dir: PathBuf,

    /// Number of values to show per decoder table (0 to skip).
    #[arg(long, default_value_t = 10)]
    decoder_rows: usize,

    /// Number of sample rows to dump per population table (0 to skip).
    #[arg(long, default_value_t = 5)]
    sample_rows: usize,

    /// Delimiter the tables were written with.
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let delimiter = delimiter_byte(args.delimiter, "delimiter")?;
    let summary = Summary::load(&args.output_dir.join(SUMMARY_FILE))?;
    let report = &summary.report;

    let span = match (summary.first_month, summary.last_month) {
        (Some(first), Some(last)) => format!("{first} .. {last}"),
        _ => "(empty)".to_string(),
    };

    // ── Overview ──────────────────────────────────────────────────────────
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  Dataset: {}", args.output_dir.display());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Region:     {:>10}  run {}", summary.region_tag, summary.run_date);
    println!("║  Months:     {span}");
    println!("║  Fact rows:  {:>10}", HumanCount(summary.fact_rows as u64));
    println!(
        "║  Train rows: {:>10}  (as_of_date_id < {})",
        HumanCount(summary.train_rows as u64),
        summary.cutoff
    );
    println!(
        "║  Test rows:  {:>10}  ({} public, {} private)",
        HumanCount(summary.test_rows as u64),
        summary.public_rows,
        summary.private_rows
    );
    println!("║  Seed:       {:>10}", summary.seed);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // ── Inputs ────────────────────────────────────────────────────────────
    println!("┌─ Inputs");
    println!(
        "│  Aggregated: {}  Superseded: {}  Not applicable: {}  Skipped: {}",
        report.inputs_aggregated,
        report.inputs_superseded.len(),
        report.inputs_not_applicable.len(),
        report.inputs_skipped.len()
    );
    println!(
        "│  Rows read: {}  Malformed: {}  Null district: {}  Null gender: {}  Missing age: {}",
        HumanCount(report.rows_read as u64),
        report.malformed_rows,
        report.rows_dropped_null_district,
        report.rows_dropped_null_gender,
        report.rows_missing_age
    );
    println!("│  Duplicate rows removed: {}", summary.duplicates_removed);
    for name in &report.inputs_not_applicable {
        println!("│    n/a   {name}");
    }
    for superseded in &report.inputs_superseded {
        println!(
            "│    repl  {} ({}) by {}",
            superseded.name, superseded.as_of, superseded.superseded_by
        );
    }
    for skipped in &report.inputs_skipped {
        println!("│    skip  {}: {}", skipped.name, skipped.reason);
    }
    println!("└──────────────────────────────────────────────────────────────");
    println!();

    // ── Decoders ──────────────────────────────────────────────────────────
    if args.decoder_rows > 0 {
        for (dimension, size) in &summary.dimensions {
            let path = args.output_dir.join(format!("{dimension}_decoder.csv"));
            let entries = read_decoder(&path, delimiter)?;
            let show = entries.len().min(args.decoder_rows);
            println!("┌─ Decoder \"{dimension}\" ({size} values, showing {show})");
            for (id, value) in entries.iter().take(show) {
                println!("│  {id:>6}  {value}");
            }
            println!("└──────────────────────────────────────────────────────────────");
        }
        println!();
    }

    // ── Population tables ─────────────────────────────────────────────────
    if args.sample_rows > 0 {
        for file in summary.files.iter().filter(|f| f.starts_with("population_")) {
            let path = args.output_dir.join(file);
            let mut rdr = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .from_path(&path)?;
            let headers = rdr.headers()?.clone();

            println!("┌─ {file}");
            print!("│ ");
            for h in headers.iter() {
                let truncated: String = h.chars().take(14).collect();
                print!(" {truncated:>14}");
            }
            println!();
            print!("│ ");
            for _ in headers.iter() {
                print!(" {:─>14}", "");
            }
            println!();
            for record in rdr.records().take(args.sample_rows) {
                let record = record?;
                print!("│ ");
                for cell in record.iter() {
                    print!(" {cell:>14}");
                }
                println!();
            }
            println!("└──────────────────────────────────────────────────────────────");
        }
    }

    Ok(())
}
