//! Per-sample classification of hotspot bins by z-score.

use crate::coordinate::{merge_coordinates, Coordinate};
use crate::error::{HaystackError, Result};
use crate::signal::SignalMatrix;
use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// z-score cutoffs for calling specific and background bins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecificityThresholds {
    pub z_score_high: f64,
    pub z_score_low: f64,
    /// Look for depletion instead of enrichment: both comparisons flip sign
    pub depleted: bool,
}

impl Default for SpecificityThresholds {
    fn default() -> Self {
        SpecificityThresholds {
            z_score_high: 1.5,
            z_score_low: 0.25,
            depleted: false,
        }
    }
}

impl SpecificityThresholds {
    pub fn is_specific(&self, z: f64) -> bool {
        if self.depleted {
            z < -self.z_score_high
        } else {
            z > self.z_score_high
        }
    }

    pub fn is_background(&self, z: f64) -> bool {
        if self.depleted {
            z > -self.z_score_low
        } else {
            z < self.z_score_low
        }
    }
}

/// Specific and background regions of one sample, merged into disjoint
/// intervals. The `*_bins` lists keep the unmerged `(row, z-score)` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecificRegions {
    pub sample: String,
    pub specific: Vec<Coordinate>,
    pub background: Vec<Coordinate>,
    pub specific_bins: Vec<(usize, f64)>,
    pub background_bins: Vec<(usize, f64)>,
}

/// z-scores each row across samples, dividing by the population standard
/// deviation. Rows without spread come out as NaN.
pub fn row_zscores(matrix: &SignalMatrix) -> Array2<f64> {
    let mut z = matrix.values().clone();
    for mut row in z.rows_mut() {
        let mean = row.iter().mean();
        let sd = row.iter().population_std_dev();
        row.mapv_inplace(|v| if sd > 0.0 { (v - mean) / sd } else { f64::NAN });
    }
    z
}

/// Classifies every sample's bins of `matrix` as specific, background, or
/// neither. `coordinates[i]` locates row `i`.
///
/// # Errors
/// * `HaystackError::InvalidInput` if the row and coordinate counts differ
pub fn classify_specificity(
    matrix: &SignalMatrix,
    coordinates: &[Coordinate],
    thresholds: &SpecificityThresholds,
) -> Result<Vec<SpecificRegions>> {
    if coordinates.len() != matrix.n_bins() {
        return Err(HaystackError::InvalidInput(format!(
            "{} coordinates for {} hotspot rows",
            coordinates.len(),
            matrix.n_bins()
        )));
    }

    let z = row_zscores(matrix);
    let regions = matrix
        .samples()
        .iter()
        .enumerate()
        .map(|(col, sample)| {
            let zs = z.column(col);
            let specific_bins: Vec<(usize, f64)> = zs
                .iter()
                .enumerate()
                .filter(|(_, z)| thresholds.is_specific(**z))
                .map(|(row, z)| (row, *z))
                .collect();
            let background_bins: Vec<(usize, f64)> = zs
                .iter()
                .enumerate()
                .filter(|(_, z)| thresholds.is_background(**z))
                .map(|(row, z)| (row, *z))
                .collect();

            let specific = merge_coordinates(
                &specific_bins
                    .iter()
                    .map(|(row, _)| coordinates[*row].clone())
                    .collect::<Vec<_>>(),
            );
            let background = merge_coordinates(
                &background_bins
                    .iter()
                    .map(|(row, _)| coordinates[*row].clone())
                    .collect::<Vec<_>>(),
            );
            info!(
                "{}: {} specific regions, {} background regions",
                sample,
                specific.len(),
                background.len()
            );

            SpecificRegions {
                sample: sample.clone(),
                specific,
                background,
                specific_bins,
                background_bins,
            }
        })
        .collect();

    Ok(regions)
}
