//! Index of dispersion per genomic bin.

use crate::error::{HaystackError, Result};
use crate::signal::SignalMatrix;
use log::{debug, info};
use statrs::statistics::Statistics;

/// Intensity floor below which a bin is treated as empty: the `th_rpm`
/// percentile of every column, minimised across columns (the dimmest
/// sample's high percentile).
pub fn intensity_threshold(matrix: &SignalMatrix, th_rpm: f64) -> f64 {
    let threshold = matrix
        .column_percentiles(th_rpm)
        .into_iter()
        .fold(f64::INFINITY, f64::min);
    info!("Estimated th_rpm:{}", threshold);
    threshold
}

/// Indices of the rows where at least one sample is strictly above `threshold`
pub fn bins_with_signal(matrix: &SignalMatrix, threshold: f64) -> Vec<usize> {
    matrix
        .values()
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().any(|v| *v > threshold))
        .map(|(idx, _)| idx)
        .collect()
}

/// Dispersion scores for the bins that carry signal, paired with the bin
/// index each score belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionProfile {
    bins: Vec<usize>,
    scores: Vec<f64>,
}

impl DispersionProfile {
    /// Computes `variance / mean` (sample variance) of every row of
    /// `matrix`, whose rows correspond to `bins`. Rows with a zero mean
    /// have no defined dispersion and are dropped.
    ///
    /// # Errors
    /// * `HaystackError::InvalidInput` if `bins` and the matrix disagree in
    ///   length or fewer than two samples are present
    pub fn from_rows(matrix: &SignalMatrix, bins: &[usize]) -> Result<Self> {
        if matrix.n_bins() != bins.len() {
            return Err(HaystackError::InvalidInput(format!(
                "{} bin indices for {} rows",
                bins.len(),
                matrix.n_bins()
            )));
        }
        if matrix.n_samples() < 2 {
            return Err(HaystackError::InvalidInput(
                "At least two samples are needed to measure variability".into(),
            ));
        }

        let mut kept_bins = Vec::with_capacity(bins.len());
        let mut scores = Vec::with_capacity(bins.len());
        for (row, &bin) in matrix.values().rows().into_iter().zip(bins) {
            let mean = row.iter().mean();
            let iod = row.iter().variance() / mean;
            if iod.is_finite() {
                kept_bins.push(bin);
                scores.push(iod);
            }
        }
        debug!(
            "Dispersion defined for {} of {} bins",
            scores.len(),
            bins.len()
        );

        Ok(DispersionProfile {
            bins: kept_bins,
            scores,
        })
    }

    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
