use crate::{ensure_dir, write_config, write_tsv, CliError};
use clap::Args;
use haystack_rs::coordinate::{read_bed, write_bed, Coordinate};
use haystack_rs::enrichment::{
    enrichment_table, significant, EnrichmentRecord, RegionScan, ScanWindow,
};
use haystack_rs::fasta::write_fasta;
use haystack_rs::genome::FastaGenome;
use haystack_rs::meme::{read_meme_background, read_meme_motifs};
use haystack_rs::motifs::{build_background, motif_enrichment, MotifEnrichment, MotifRunConfig};
use haystack_rs::scan::ScanThreshold;
use haystack_rs::types::Strand;
use log::{info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct MotifsArgs {
    /// BED file with the target regions
    #[arg(value_name = "TARGET_BED")]
    target: PathBuf,

    /// Genome FASTA the regions refer to
    #[arg(value_name = "GENOME_FASTA")]
    genome: PathBuf,

    /// Motif database in MEME format
    #[arg(value_name = "MEME_FILE")]
    meme: PathBuf,

    /// Directory for the results, created if missing
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: PathBuf,

    /// BED file with candidate background regions, drawn from the genome otherwise
    #[arg(long, value_name = "BACKGROUND_BED")]
    background: Option<PathBuf>,

    /// MEME background model with nucleotide frequencies
    #[arg(long, value_name = "BG_FILE")]
    nucleotide_bg: Option<PathBuf>,

    /// Hit threshold as a fraction of each motif's best score
    #[arg(long, default_value = "0.7", conflicts_with = "threshold_score")]
    threshold_fraction: f64,

    /// Hit threshold as an absolute log-odds score
    #[arg(long)]
    threshold_score: Option<f64>,

    /// Pseudocount weight of the background in each PWM column
    #[arg(long, default_value = "0.01")]
    pseudocount: f64,

    /// Length of the central window, defaults to the average target length
    #[arg(long)]
    internal_window_length: Option<usize>,

    /// Length of the scanned window, defaults to five internal windows
    #[arg(long)]
    window_length: Option<usize>,

    /// Number of C+G content bins for background matching
    #[arg(long, default_value = "8")]
    c_g_bins: usize,

    /// Do not match the background C+G content to the targets
    #[arg(long)]
    no_c_g_correction: bool,

    /// Background regions per target region
    #[arg(long, default_value = "2")]
    bg_target_ratio: usize,

    /// Mask soft-masked (lowercase) bases before scanning
    #[arg(long)]
    mask_repetitive: bool,

    /// Smallest central enrichment a reported motif must exceed
    #[arg(long, default_value = "1.0")]
    min_central_enrichment: f64,

    /// Ignore the target/background ratio when ranking and filtering
    #[arg(long)]
    disable_ratio: bool,

    /// Seed for background sampling
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Worker threads for scanning, defaults to the available cores
    #[arg(long)]
    n_workers: Option<usize>,

    /// Name prefix for the output tables
    #[arg(long)]
    name: Option<String>,
}

fn average_length(regions: &[Coordinate]) -> Result<usize, CliError> {
    if regions.is_empty() {
        return Err(CliError::InvalidArguments("no target regions".into()));
    }
    let total: u64 = regions.iter().map(Coordinate::len).sum();
    Ok((total as f64 / regions.len() as f64).round() as usize)
}

impl MotifsArgs {
    fn config(&self, targets: &[Coordinate]) -> Result<MotifRunConfig, CliError> {
        let internal = match self.internal_window_length {
            Some(len) => len,
            None => average_length(targets)?,
        };
        let window_length = self.window_length.unwrap_or(internal * 5);
        let mut config = MotifRunConfig::new(ScanWindow::new(window_length, internal)?);

        config.threshold = match self.threshold_score {
            Some(score) => ScanThreshold::Absolute(score),
            None => ScanThreshold::FractionOfMax(self.threshold_fraction),
        };
        config.pseudocount = self.pseudocount;
        config.c_g_correction = !self.no_c_g_correction;
        config.c_g_bins = self.c_g_bins;
        config.bg_target_ratio = self.bg_target_ratio;
        config.mask_repetitive = self.mask_repetitive;
        config.seed = self.seed;
        config.n_workers = self.n_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        });
        config.enrichment.min_central_enrichment = self.min_central_enrichment;
        config.enrichment.disable_ratio = self.disable_ratio;
        config.validate()?;
        Ok(config)
    }
}

/// Genomic coordinates of the central hits of one motif
fn hit_regions(scan: &RegionScan, regions: &[Coordinate], window_length: usize) -> Vec<Coordinate> {
    let half = window_length as u64 / 2;
    scan.central_hits
        .iter()
        .map(|(idx, hit)| {
            let region = &regions[*idx];
            let start = region.center() - half;
            let mut coord = Coordinate::new(
                region.chrom.clone(),
                start + hit.position as u64,
                start + hit.end as u64,
            )
            .with_name(scan.motif_id.clone())
            .with_score(hit.score);
            coord.strand = Some(match hit.strand {
                Strand::Forward => '+',
                Strand::Reverse => '-',
            });
            coord
        })
        .collect()
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect()
}

pub fn run(args: MotifsArgs) -> Result<(), CliError> {
    let targets = read_bed(&args.target)?;
    let config = args.config(&targets)?;
    ensure_dir(&args.output_dir)?;
    write_config(&config, &args.output_dir)?;

    let background = match &args.nucleotide_bg {
        Some(path) => Some(read_meme_background(path)?),
        None => None,
    };
    let motifs = read_meme_motifs(&args.meme, background, config.pseudocount)?;
    let genome = FastaGenome::from_fasta(&args.genome)?;

    let candidates = match &args.background {
        Some(path) => Some(read_bed(path)?),
        None => None,
    };
    let bg_regions = build_background(&targets, candidates.as_deref(), &genome, &config)?;
    if bg_regions.is_empty() {
        return Err(CliError::InvalidArguments(
            "no background regions could be selected".into(),
        ));
    }
    write_bed(&bg_regions, args.output_dir.join("background.bed"), true)?;

    let result = motif_enrichment(&motifs, &targets, &bg_regions, &genome, &config)?;

    let prefix = args.name.as_deref().map(|n| format!("{}_", n)).unwrap_or_default();
    write_region_sequences(
        &result.target_frame()?,
        &args.output_dir.join(format!("{}target_sequences.fa", prefix)),
        "target",
    )?;
    write_region_sequences(
        &result.background_frame()?,
        &args.output_dir.join(format!("{}background_sequences.fa", prefix)),
        "background",
    )?;

    let all: Vec<_> = result.records.iter().collect();
    write_tsv(
        &mut enrichment_table(&all)?,
        &args.output_dir.join(format!("{}all_motifs.tsv", prefix)),
    )?;
    let reported = significant(&result.records, &config.enrichment);
    write_tsv(
        &mut enrichment_table(&reported)?,
        &args.output_dir.join(format!("{}motif_enrichment.tsv", prefix)),
    )?;

    if reported.is_empty() {
        warn!("No motif passed the enrichment filters");
        return Ok(());
    }
    write_motif_regions(&result, &reported, &args.output_dir, config.window.window_length)?;
    Ok(())
}

fn write_region_sequences(frame: &DataFrame, filename: &Path, kind: &str) -> Result<(), CliError> {
    write_fasta(frame, filename)?;
    let mean_gc = frame.column("gc_content")?.f64()?.mean().unwrap_or(f64::NAN);
    info!(
        "{} {} sequences written to {} (mean C+G {:.3})",
        frame.height(),
        kind,
        filename.display(),
        mean_gc
    );
    Ok(())
}

fn write_motif_regions(
    result: &MotifEnrichment,
    reported: &[&EnrichmentRecord],
    output_dir: &Path,
    window_length: usize,
) -> Result<(), CliError> {
    let directory = output_dir.join("motifs_regions");
    ensure_dir(&directory)?;
    for record in reported {
        let Some(scan) = result
            .target_scans
            .iter()
            .find(|s| s.motif_id == record.motif_id)
        else {
            continue;
        };
        let regions = hit_regions(scan, &result.target_regions, window_length);
        write_bed(
            &regions,
            directory.join(format!(
                "{}_motif_region_in_target.bed",
                file_safe(&record.motif_id)
            )),
            false,
        )?;
    }
    info!("Motif regions written to {}", directory.display());
    Ok(())
}
