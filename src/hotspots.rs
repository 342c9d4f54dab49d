//! Variability hotspot detection across samples.
//!
//! signal matrix -> quantile normalisation -> intensity filter -> variance
//! transform -> index of dispersion -> knee selection -> per-sample z-scores.

use crate::coordinate::{merge_coordinates, write_bed, write_bedgraph, Coordinate};
use crate::dispersion::{bins_with_signal, intensity_threshold, DispersionProfile};
use crate::error::{HaystackError, Result};
use crate::inflection::{find_knee, KneeSelection};
use crate::normalize::{quantile_normalize, VarianceTransform};
use crate::signal::SignalMatrix;
use crate::specificity::{classify_specificity, SpecificRegions, SpecificityThresholds};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of a hotspot run. Built once and validated at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotConfig {
    /// Percentile of the signal intensity used as the empty-bin floor
    pub th_rpm: f64,
    pub transformation: VarianceTransform,
    /// Upper bound on the fraction of bins selected, in (0, 1]
    pub max_regions_percentage: f64,
    pub quantile_normalization: bool,
    #[serde(flatten)]
    pub specificity: SpecificityThresholds,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        HotspotConfig {
            th_rpm: 99.0,
            transformation: VarianceTransform::Angle,
            max_regions_percentage: 0.1,
            quantile_normalization: true,
            specificity: SpecificityThresholds::default(),
        }
    }
}

impl HotspotConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.th_rpm > 0.0 && self.th_rpm <= 100.0) {
            return Err(HaystackError::invalid_parameter(
                "th_rpm",
                self.th_rpm,
                "must be a percentile in (0, 100]",
            ));
        }
        if !(self.max_regions_percentage > 0.0 && self.max_regions_percentage <= 1.0) {
            return Err(HaystackError::invalid_parameter(
                "max_regions_percentage",
                self.max_regions_percentage,
                "must be in (0, 1]",
            ));
        }
        for (name, value) in [
            ("z_score_high", self.specificity.z_score_high),
            ("z_score_low", self.specificity.z_score_low),
        ] {
            if !value.is_finite() {
                return Err(HaystackError::invalid_parameter(name, value, "must be finite"));
            }
        }
        Ok(())
    }
}

/// Everything a hotspot run produces. Bin indices refer to the rows of the
/// input matrix and to the bin coordinates passed to [`compute_hotspots`].
#[derive(Debug, Clone)]
pub struct HotspotResult {
    /// The matrix after quantile normalisation (or the input, if disabled)
    pub normalized: SignalMatrix,
    pub intensity_threshold: f64,
    pub dispersion: DispersionProfile,
    pub knee: KneeSelection,
    /// Selected bins, ascending
    pub hotspot_bins: Vec<usize>,
    pub regions: Vec<SpecificRegions>,
}

impl HotspotResult {
    fn check_bins(&self, bins: &[Coordinate]) -> Result<()> {
        if bins.len() != self.normalized.n_bins() {
            return Err(HaystackError::InvalidInput(format!(
                "{} bin coordinates for a result over {} bins",
                bins.len(),
                self.normalized.n_bins()
            )));
        }
        Ok(())
    }

    /// `(bin, dispersion)` for every bin that carried signal
    ///
    /// # Errors
    /// * `HaystackError::InvalidInput` if `bins` does not match the matrix rows
    pub fn variability_track<'a>(&self, bins: &'a [Coordinate]) -> Result<Vec<(&'a Coordinate, f64)>> {
        self.check_bins(bins)?;
        Ok(self
            .dispersion
            .bins()
            .iter()
            .zip(self.dispersion.scores())
            .map(|(&bin, &score)| (&bins[bin], score))
            .collect())
    }

    /// `(bin, dispersion)` of the selected bins only
    pub fn hotspot_track<'a>(&self, bins: &'a [Coordinate]) -> Result<Vec<(&'a Coordinate, f64)>> {
        self.check_bins(bins)?;
        Ok(self
            .dispersion
            .bins()
            .iter()
            .zip(self.dispersion.scores())
            .zip(&self.knee.selected)
            .filter(|(_, selected)| **selected)
            .map(|((&bin, &score), _)| (&bins[bin], score))
            .collect())
    }

    /// Selected bins merged into disjoint regions
    pub fn merged_hotspots(&self, bins: &[Coordinate]) -> Result<Vec<Coordinate>> {
        self.check_bins(bins)?;
        let coords: Vec<Coordinate> = self
            .hotspot_bins
            .iter()
            .map(|&b| bins[b].clone())
            .collect();
        Ok(merge_coordinates(&coords))
    }

    /// Writes, for every sample, the hotspot bins specific to it and the ones
    /// where it is background: a bedGraph of z-scores and a merged BED each.
    ///
    /// Files are named `Regions_specific_for_{sample}_z_{high}` and
    /// `Background_for_{sample}_z_{low}` inside `directory`, which must exist.
    pub fn write_specific_regions(
        &self,
        bins: &[Coordinate],
        thresholds: &SpecificityThresholds,
        directory: impl AsRef<Path>,
    ) -> Result<()> {
        self.check_bins(bins)?;
        let directory = directory.as_ref();
        for regions in &self.regions {
            let name = format!(
                "Regions_specific_for_{}_z_{:.2}",
                regions.sample, thresholds.z_score_high
            );
            write_bedgraph(
                regions
                    .specific_bins
                    .iter()
                    .map(|(row, z)| (&bins[self.hotspot_bins[*row]], *z)),
                directory.join(format!("{}.bedgraph", name)),
            )?;
            write_bed(&regions.specific, directory.join(format!("{}.bed", name)), true)?;

            let name = format!(
                "Background_for_{}_z_{:.2}",
                regions.sample, thresholds.z_score_low
            );
            write_bedgraph(
                regions
                    .background_bins
                    .iter()
                    .map(|(row, z)| (&bins[self.hotspot_bins[*row]], *z)),
                directory.join(format!("{}.bedgraph", name)),
            )?;
            write_bed(&regions.background, directory.join(format!("{}.bed", name)), true)?;
        }
        Ok(())
    }
}

/// Finds the bins whose signal varies most across samples and, for every
/// sample, the hotspot regions where it is specifically high (or low).
///
/// # Errors
/// * `HaystackError::InvalidParameter` for an invalid configuration
/// * `HaystackError::InvalidInput` if `bins` does not match the matrix rows
/// * `HaystackError::NumericDegeneracy` if no bin carries signal or the
///   dispersion profile has no knee
pub fn compute_hotspots(
    matrix: &SignalMatrix,
    bins: &[Coordinate],
    config: &HotspotConfig,
) -> Result<HotspotResult> {
    config.validate()?;
    if bins.len() != matrix.n_bins() {
        return Err(HaystackError::InvalidInput(format!(
            "{} bin coordinates for a matrix of {} bins",
            bins.len(),
            matrix.n_bins()
        )));
    }

    let normalized = if config.quantile_normalization {
        info!("Normalizing the data...");
        quantile_normalize(matrix)
    } else {
        matrix.clone()
    };

    let threshold = intensity_threshold(&normalized, config.th_rpm);
    let signal_bins = bins_with_signal(&normalized, threshold);
    if signal_bins.is_empty() {
        return Err(HaystackError::degenerate(format!(
            "no bin is above the intensity threshold {}",
            threshold
        )));
    }
    info!(
        "{} of {} bins carry signal",
        signal_bins.len(),
        matrix.n_bins()
    );

    info!("Using {} transformation", config.transformation);
    let transformed = config
        .transformation
        .apply(&normalized.select_rows(&signal_bins))?;

    let dispersion = DispersionProfile::from_rows(&transformed, &signal_bins)?;
    let knee = find_knee(dispersion.scores(), config.max_regions_percentage)?;

    let hotspot_bins: Vec<usize> = dispersion
        .bins()
        .iter()
        .zip(&knee.selected)
        .filter(|(_, selected)| **selected)
        .map(|(&bin, _)| bin)
        .collect();

    // signal_bins is ascending, so row lookups can bisect
    let hotspot_rows: Vec<usize> = hotspot_bins
        .iter()
        .filter_map(|bin| signal_bins.binary_search(bin).ok())
        .collect();
    let hotspot_coords: Vec<Coordinate> =
        hotspot_bins.iter().map(|&b| bins[b].clone()).collect();

    info!("Writing Specific Regions for each sample...");
    let regions = classify_specificity(
        &transformed.select_rows(&hotspot_rows),
        &hotspot_coords,
        &config.specificity,
    )?;

    Ok(HotspotResult {
        normalized,
        intensity_threshold: threshold,
        dispersion,
        knee,
        hotspot_bins,
        regions,
    })
}
