//! Cross-sample normalisation and variance-stabilising transforms.

use crate::error::{HaystackError, Result};
use crate::signal::SignalMatrix;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scale constant of the angle transform, `arcsin(sqrt(x) / ANGLE_SCALE)`.
/// Kept at 1e6 so results stay comparable with earlier runs.
pub const ANGLE_SCALE: f64 = 1_000_000.0;

/// Quantile-normalises the columns of a signal matrix.
///
/// Each column is ranked with a stable sort (ties keep row order), the values
/// at every rank are averaged across columns, and each cell is replaced by the
/// average of its rank. All output columns share the same sorted values.
pub fn quantile_normalize(matrix: &SignalMatrix) -> SignalMatrix {
    let values = matrix.values();
    let (n_bins, n_samples) = values.dim();

    let order: Vec<Vec<usize>> = values
        .columns()
        .into_iter()
        .map(|col| {
            let mut idx: Vec<usize> = (0..n_bins).collect();
            idx.sort_by(|&a, &b| col[a].total_cmp(&col[b]));
            idx
        })
        .collect();

    let mut rank_means = Array1::<f64>::zeros(n_bins);
    for (col, idx) in order.iter().enumerate() {
        for (rank, &row) in idx.iter().enumerate() {
            rank_means[rank] += values[[row, col]];
        }
    }
    rank_means /= n_samples as f64;

    let mut normalized = Array2::<f64>::zeros((n_bins, n_samples));
    for (col, idx) in order.iter().enumerate() {
        for (rank, &row) in idx.iter().enumerate() {
            normalized[[row, col]] = rank_means[rank];
        }
    }

    matrix.with_values(normalized)
}

/// Elementwise variance-stabilising transform applied before dispersion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceTransform {
    None,
    /// `log2(x + 1)`
    Log2,
    /// `arcsin(sqrt(x) / ANGLE_SCALE)`
    #[default]
    Angle,
}

impl VarianceTransform {
    pub fn apply_value(&self, x: f64) -> f64 {
        match self {
            VarianceTransform::None => x,
            VarianceTransform::Log2 => (x + 1.0).log2(),
            VarianceTransform::Angle => (x.sqrt() / ANGLE_SCALE).asin(),
        }
    }

    /// # Errors
    /// * `HaystackError::InvalidInput` if the angle transform receives a value
    ///   above `ANGLE_SCALE²`, where arcsin is undefined
    pub fn apply(&self, matrix: &SignalMatrix) -> Result<SignalMatrix> {
        if *self == VarianceTransform::Angle {
            let limit = ANGLE_SCALE * ANGLE_SCALE;
            if let Some(v) = matrix.values().iter().find(|v| **v > limit) {
                return Err(HaystackError::InvalidInput(format!(
                    "Value {} is outside the angle transform domain [0, {}]",
                    v, limit
                )));
            }
        }
        Ok(matrix.map(|x| self.apply_value(x)))
    }
}

impl fmt::Display for VarianceTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarianceTransform::None => "none",
            VarianceTransform::Log2 => "log2",
            VarianceTransform::Angle => "angle",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for VarianceTransform {
    type Err = HaystackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(VarianceTransform::None),
            "log2" => Ok(VarianceTransform::Log2),
            "angle" => Ok(VarianceTransform::Angle),
            other => Err(HaystackError::invalid_parameter(
                "transformation",
                other,
                "expected one of none, log2, angle",
            )),
        }
    }
}
