use crate::{ensure_dir, write_config, write_tsv, CliError};
use clap::Args;
use haystack_rs::coordinate::{read_bed, write_bed, write_bedgraph};
use haystack_rs::genome::FastaGenome;
use haystack_rs::hotspots::{compute_hotspots, HotspotConfig, HotspotResult};
use haystack_rs::normalize::VarianceTransform;
use haystack_rs::signal::{load_signal_matrix, read_sample_sheet};
use haystack_rs::specificity::SpecificityThresholds;
use haystack_rs::tools::{bedgraph_to_bigwig, SubprocessRunner};
use log::{info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct HotspotsArgs {
    /// Sample sheet: one `name path` pair per line, each path a per-bin track
    #[arg(value_name = "SAMPLES_FILE")]
    samples: PathBuf,

    /// BED file with the genomic bins, in the order of the track values
    #[arg(value_name = "BINS_FILE")]
    bins: PathBuf,

    /// Directory for the results, created if missing
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Percentile of the signal used to discard empty bins
    #[arg(long, default_value = "99")]
    th_rpm: f64,

    /// Variance-stabilizing transform: none, log2 or angle
    #[arg(long, default_value = "angle")]
    transformation: VarianceTransform,

    /// z-score above which a bin is specific to a sample
    #[arg(long, default_value = "1.5")]
    z_score_high: f64,

    /// z-score below which a bin is background for a sample
    #[arg(long, default_value = "0.25")]
    z_score_low: f64,

    /// Largest fraction of bins that can be selected as hotspots
    #[arg(long, default_value = "0.1")]
    max_regions_percentage: f64,

    /// Look for regions depleted in a sample instead of enriched
    #[arg(long)]
    depleted: bool,

    /// Skip quantile normalization of the tracks
    #[arg(long)]
    no_quantile_normalization: bool,

    /// Also write the quantile-normalized tracks as bedgraphs
    #[arg(long)]
    write_normalized: bool,

    /// Genome FASTA, needed to build bigWig tracks
    #[arg(long, value_name = "GENOME_FASTA")]
    genome: Option<PathBuf>,

    /// Convert the variability track to bigWig with bedGraphToBigWig
    #[arg(long, requires = "genome")]
    bigwig: bool,

    /// Seconds an external tool may run before it is killed
    #[arg(long, default_value = "3600")]
    tool_timeout: u64,
}

impl HotspotsArgs {
    fn config(&self) -> HotspotConfig {
        HotspotConfig {
            th_rpm: self.th_rpm,
            transformation: self.transformation,
            max_regions_percentage: self.max_regions_percentage,
            quantile_normalization: !self.no_quantile_normalization,
            specificity: SpecificityThresholds {
                z_score_high: self.z_score_high,
                z_score_low: self.z_score_low,
                depleted: self.depleted,
            },
        }
    }
}

fn write_selection_curve(result: &HotspotResult, filename: &Path) -> Result<(), CliError> {
    let knee = &result.knee;
    let slope: Vec<Option<f64>> = (0..knee.x.len())
        .map(|i| knee.slope.get(i).copied())
        .collect();
    let is_knee: Vec<bool> = (0..knee.x.len()).map(|i| i == knee.knee_index).collect();

    let mut df = DataFrame::new(vec![
        Column::new("x".into(), knee.x.clone()),
        Column::new("y".into(), knee.y.clone()),
        Column::new("slope".into(), slope),
        Column::new("knee".into(), is_knee),
    ])?;
    write_tsv(&mut df, filename)
}

pub fn run(args: HotspotsArgs) -> Result<(), CliError> {
    let config = args.config();
    config.validate()?;
    ensure_dir(&args.output_dir)?;
    write_config(&config, &args.output_dir)?;

    let samples = read_sample_sheet(&args.samples)?;
    let matrix = load_signal_matrix(&samples)?;
    let bins = read_bed(&args.bins)?;

    let result = compute_hotspots(&matrix, &bins, &config)?;
    let out = &args.output_dir;

    if args.write_normalized {
        let directory = out.join("NORMALIZED_TRACKS");
        ensure_dir(&directory)?;
        for (col, sample) in result.normalized.samples().iter().enumerate() {
            let values = result.normalized.column(col);
            write_bedgraph(
                bins.iter().zip(values.iter().copied()),
                directory.join(format!("{}.normalized.bedgraph", sample)),
            )?;
        }
    }

    let variability = out.join("VARIABILITY.bedgraph");
    write_bedgraph(result.variability_track(&bins)?, &variability)?;
    write_bedgraph(
        result.hotspot_track(&bins)?,
        out.join("SELECTED_VARIABILITY_HOTSPOT.bedgraph"),
    )?;
    let hotspots = result.merged_hotspots(&bins)?;
    write_bed(&hotspots, out.join("SELECTED_VARIABILITY_HOTSPOT.bed"), true)?;
    info!(
        "{} bins selected, merged into {} hotspots",
        result.hotspot_bins.len(),
        hotspots.len()
    );

    write_selection_curve(&result, &out.join("SELECTION_OF_VARIABILITY_HOTSPOT.tsv"))?;
    let specific_dir = out.join("SPECIFIC_REGIONS");
    ensure_dir(&specific_dir)?;
    result.write_specific_regions(&bins, &config.specificity, &specific_dir)?;

    if args.bigwig {
        let genome_path = args
            .genome
            .as_ref()
            .ok_or_else(|| CliError::InvalidArguments("--bigwig needs --genome".into()))?;
        let genome = FastaGenome::from_fasta(genome_path)?;
        let runner = SubprocessRunner::with_timeout(Duration::from_secs(args.tool_timeout));
        if let Err(e) = bedgraph_to_bigwig(&runner, &genome, &variability, &out.join("VARIABILITY.bw")) {
            warn!("Skipping the bigWig track: {}", e);
        }
    }

    Ok(())
}
