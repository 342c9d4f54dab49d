mod hotspots;
mod motifs;

use clap::{Parser, Subcommand};
use haystack_rs::error::HaystackError;
use log::{error, info, LevelFilter};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Haystack(#[from] HaystackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Cannot write configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "haystack",
    about = "Finds variability hotspots across epigenomic tracks and the motifs enriched in them",
    long_about = "Quantile-normalizes per-bin signal tracks of many samples, selects the bins whose \
                  signal varies most across samples, calls the regions specific to each sample, and \
                  tests motif databases for enrichment in a region set against a GC-matched background.",
    version,
    after_help = "Example usage:\n    \
                  haystack hotspots samples.txt bins.bed results/ --transformation angle\n    \
                  haystack motifs specific.bed hg19.fa JASPAR.meme results/ --n-workers 8",
    color = clap::ColorChoice::Always
)]
struct Cli {
    /// Print debug messages (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select variability hotspots and sample-specific regions
    Hotspots(hotspots::HotspotsArgs),
    /// Test motifs for enrichment in target regions
    Motifs(motifs::MotifsArgs),
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    pretty_env_logger::formatted_timed_builder()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Creates the output directory, and its parents, if missing
pub(crate) fn ensure_dir(path: &Path) -> Result<(), CliError> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Writes the configuration actually used by a run next to its results
pub(crate) fn write_config<T: serde::Serialize>(config: &T, output_dir: &Path) -> Result<(), CliError> {
    let filename = output_dir.join("config.json");
    serde_json::to_writer_pretty(File::create(&filename)?, config)?;
    info!("Configuration written to {}", filename.display());
    Ok(())
}

/// Writes a DataFrame as a tab-separated table with a header
pub(crate) fn write_tsv(df: &mut DataFrame, filename: &Path) -> Result<(), CliError> {
    let mut file = File::create(filename)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)?;
    Ok(())
}

fn main() -> Result<(), CliError> {
    let start_time = std::time::Instant::now();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Hotspots(args) => hotspots::run(args),
        Command::Motifs(args) => motifs::run(args),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }

    let elapsed = start_time.elapsed();
    info!(
        "Total execution time: {:.4} minutes",
        elapsed.as_secs_f64() / 60.0
    );
    result
}
