//! Motif enrichment run: region windows, background selection, scanning and
//! testing.

use crate::background::{
    downsample, random_background, random_gc_matched_background, region_gc_content,
    sample_gc_matched_background,
};
use crate::coordinate::Coordinate;
use crate::enrichment::{
    scan_regions, test_enrichment, EnrichmentConfig, EnrichmentRecord, RegionScan, ScanWindow,
};
use crate::error::{HaystackError, Result};
use crate::fasta::gc_content;
use crate::genome::SequenceProvider;
use crate::pwm::{MotifRecord, DEFAULT_PSEUDOCOUNT};
use crate::scan::ScanThreshold;
use log::{info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Random draws per target before a GC-matched region is given up on
pub const MAX_GC_MATCH_TRIES: usize = 1000;

/// Parameters of a motif enrichment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifRunConfig {
    #[serde(flatten)]
    pub window: ScanWindow,
    pub threshold: ScanThreshold,
    pub pseudocount: f64,
    pub c_g_correction: bool,
    pub c_g_bins: usize,
    /// Background regions wanted per target region
    pub bg_target_ratio: usize,
    pub mask_repetitive: bool,
    pub n_workers: usize,
    pub seed: u64,
    #[serde(flatten)]
    pub enrichment: EnrichmentConfig,
}

impl MotifRunConfig {
    /// Defaults for everything but the scan window
    pub fn new(window: ScanWindow) -> Self {
        MotifRunConfig {
            window,
            threshold: ScanThreshold::default(),
            pseudocount: DEFAULT_PSEUDOCOUNT,
            c_g_correction: true,
            c_g_bins: 8,
            bg_target_ratio: 2,
            mask_repetitive: false,
            n_workers: 1,
            seed: 0,
            enrichment: EnrichmentConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ScanWindow::new(self.window.window_length, self.window.internal_window_length)?;
        let threshold = match self.threshold {
            ScanThreshold::Absolute(t) | ScanThreshold::FractionOfMax(t) => t,
        };
        if !threshold.is_finite() {
            return Err(HaystackError::invalid_parameter(
                "threshold",
                threshold,
                "must be finite",
            ));
        }
        if !(self.pseudocount.is_finite() && self.pseudocount >= 0.0) {
            return Err(HaystackError::invalid_parameter(
                "pseudocount",
                self.pseudocount,
                "must be finite and non-negative",
            ));
        }
        if self.c_g_bins < 2 {
            return Err(HaystackError::invalid_parameter(
                "c_g_bins",
                self.c_g_bins,
                "at least two bins are needed",
            ));
        }
        if self.bg_target_ratio == 0 {
            return Err(HaystackError::invalid_parameter(
                "bg_target_ratio",
                self.bg_target_ratio,
                "must be at least 1",
            ));
        }
        if self.n_workers == 0 {
            return Err(HaystackError::invalid_parameter(
                "n_workers",
                self.n_workers,
                "must be at least 1",
            ));
        }
        self.enrichment.validate()
    }
}

/// Sequences of `window_length` bases centred on every region, with the
/// regions they belong to. Regions whose window runs off the chromosome are
/// left out with a warning.
pub fn window_sequences<G: SequenceProvider + ?Sized>(
    regions: &[Coordinate],
    genome: &G,
    window_length: usize,
    mask_repetitive: bool,
) -> Result<(Vec<Coordinate>, Vec<String>)> {
    let half = window_length as u64 / 2;
    let mut kept = Vec::with_capacity(regions.len());
    let mut sequences = Vec::with_capacity(regions.len());
    let mut skipped = 0usize;
    for region in regions {
        let chrom_len = genome.chromosome_length(&region.chrom).ok_or_else(|| {
            HaystackError::InvalidInput(format!("Unknown chromosome {}", region.chrom))
        })?;
        let Some(start) = region.center().checked_sub(half) else {
            skipped += 1;
            continue;
        };
        let window = Coordinate::new(region.chrom.clone(), start, start + window_length as u64);
        if window.end > chrom_len {
            skipped += 1;
            continue;
        }
        sequences.push(genome.extract_sequence(&window, mask_repetitive)?);
        kept.push(region.clone());
    }
    if skipped > 0 {
        warn!(
            "{} regions are too close to a chromosome end for a {}bp window",
            skipped, window_length
        );
    }
    Ok((kept, sequences))
}

/// Builds the background region set.
///
/// Without `candidates`, regions are drawn at random from the genome (GC
/// matched when `c_g_correction` is set). With candidates, they are
/// subsampled to match the target GC histogram. Either way at most
/// `bg_target_ratio` regions per target are kept.
pub fn build_background<G: SequenceProvider + ?Sized>(
    targets: &[Coordinate],
    candidates: Option<&[Coordinate]>,
    genome: &G,
    config: &MotifRunConfig,
) -> Result<Vec<Coordinate>> {
    let wanted = config.bg_target_ratio * targets.len();
    let background = match candidates {
        None if config.c_g_correction => {
            info!("Extract a Matching C+G Background");
            random_gc_matched_background(
                targets,
                genome,
                config.bg_target_ratio,
                config.c_g_bins,
                MAX_GC_MATCH_TRIES,
                config.seed,
            )?
        }
        None => {
            info!("Extracting Random Coordinates from the genome...");
            let mut background = Vec::with_capacity(wanted);
            for round in 0..config.bg_target_ratio {
                background.extend(random_background(
                    targets,
                    genome,
                    config.seed.wrapping_add(round as u64),
                )?);
            }
            background
        }
        Some(candidates) if config.c_g_correction => {
            info!("Calculating the C+G content");
            let target_gc = region_gc_content(targets, genome)?;
            let candidate_gc = region_gc_content(candidates, genome)?;
            let picked = sample_gc_matched_background(
                &target_gc,
                &candidate_gc,
                config.bg_target_ratio as f64,
                config.c_g_bins,
                config.seed,
            )?;
            picked.into_iter().map(|i| candidates[i].clone()).collect()
        }
        Some(candidates) => candidates.to_vec(),
    };
    Ok(downsample(&background, wanted, config.seed))
}

/// Everything a motif enrichment run produces.
#[derive(Debug, Clone)]
pub struct MotifEnrichment {
    /// All tested motifs, in rank order
    pub records: Vec<EnrichmentRecord>,
    /// Target regions that were scanned; region indices of the scans
    /// refer to this list
    pub target_regions: Vec<Coordinate>,
    /// Window sequences of `target_regions`
    pub target_sequences: Vec<String>,
    /// Target scans, in motif order
    pub target_scans: Vec<RegionScan>,
    pub background_regions: Vec<Coordinate>,
    pub background_sequences: Vec<String>,
    pub background_scans: Vec<RegionScan>,
}

impl MotifEnrichment {
    pub fn target_frame(&self) -> Result<DataFrame> {
        sequence_frame(&self.target_regions, &self.target_sequences)
    }

    pub fn background_frame(&self) -> Result<DataFrame> {
        sequence_frame(&self.background_regions, &self.background_sequences)
    }
}

/// Region sequences as a `label`/`sequence` frame, labelled `chrom:start-end`,
/// with their C+G content in a `gc_content` column.
///
/// # Errors
/// * `HaystackError::InvalidInput` if regions and sequences differ in number
pub fn sequence_frame(regions: &[Coordinate], sequences: &[String]) -> Result<DataFrame> {
    if regions.len() != sequences.len() {
        return Err(HaystackError::InvalidInput(format!(
            "{} regions for {} sequences",
            regions.len(),
            sequences.len()
        )));
    }
    let labels: Vec<String> = regions.iter().map(|r| r.to_string()).collect();
    let df = DataFrame::new(vec![
        Column::new("label".into(), labels),
        Column::new("sequence".into(), sequences.to_vec()),
    ])?;
    let gc = gc_content(&df)?;
    Ok(df.hstack(&[gc.column("gc_content")?.clone()])?)
}

/// Scans target and background windows with every motif and tests each
/// motif for enrichment.
pub fn motif_enrichment<G: SequenceProvider + ?Sized>(
    motifs: &[MotifRecord],
    targets: &[Coordinate],
    background: &[Coordinate],
    genome: &G,
    config: &MotifRunConfig,
) -> Result<MotifEnrichment> {
    config.validate()?;
    let window = config.window;

    info!("Extracting Motifs in target coordinates");
    let (target_regions, target_sequences) = window_sequences(
        targets,
        genome,
        window.window_length,
        config.mask_repetitive,
    )?;
    let target_scans = scan_regions(
        motifs,
        &target_sequences,
        &window,
        config.threshold,
        config.n_workers,
    )?;

    info!("Extracting Motifs in background coordinates");
    let (background_regions, background_sequences) = window_sequences(
        background,
        genome,
        window.window_length,
        config.mask_repetitive,
    )?;
    let background_scans = scan_regions(
        motifs,
        &background_sequences,
        &window,
        config.threshold,
        config.n_workers,
    )?;

    let records = test_enrichment(
        &target_scans,
        &background_scans,
        &window,
        &config.enrichment,
    )?;
    Ok(MotifEnrichment {
        records,
        target_regions,
        target_sequences,
        target_scans,
        background_regions,
        background_sequences,
        background_scans,
    })
}
