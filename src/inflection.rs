//! Knee detection on the sorted dispersion curve.
//!
//! The scores are min-max normalised and sorted, giving a convex curve over
//! `[0, 1]`. Its smoothed slope is compared with the 45° line, and the knee
//! is the point in the allowed tail where the slope first rises most gently
//! above it, the same heuristic used to call super-enhancers.

use crate::error::{HaystackError, Result};
use log::{debug, info};
use serde::Serialize;
use std::f64::consts::PI;

/// Length of the Hann window used to smooth the slope of the sorted curve
pub const SMOOTHING_WINDOW: usize = 50;

/// Outcome of the knee search, with the data needed to plot the curve.
#[derive(Debug, Clone, Serialize)]
pub struct KneeSelection {
    /// Evenly spaced points in [0, 1]
    pub x: Vec<f64>,
    /// Normalised scores, sorted ascending
    pub y: Vec<f64>,
    /// Smoothed slope of `y` minus 1, before masking
    pub slope: Vec<f64>,
    /// Index into the sorted curve of the chosen cutoff
    pub knee_index: usize,
    /// Dispersion value at the knee; scores strictly above it are selected
    pub threshold: f64,
    /// Selection flag per input score, in input order
    pub selected: Vec<bool>,
}

impl KneeSelection {
    pub fn n_selected(&self) -> usize {
        self.selected.iter().filter(|s| **s).count()
    }
}

/// Symmetric Hann window of length `len`, zero at both ends
pub(crate) fn hann_window(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (len - 1) as f64).cos())
        .collect()
}

/// Hann-weighted moving average of `x`, same length as the input.
///
/// The series is padded by reflection on both sides before the window is
/// applied, so the edges are not pulled towards zero.
pub(crate) fn smooth(x: &[f64], window: usize) -> Result<Vec<f64>> {
    let n = x.len();
    if window < 3 || n < window {
        return Err(HaystackError::degenerate(format!(
            "cannot smooth {} points with a window of {}",
            n, window
        )));
    }

    let mut padded = Vec::with_capacity(n + 2 * (window - 1));
    padded.extend(x[1..window].iter().rev());
    padded.extend_from_slice(x);
    padded.extend(x[n + 1 - window..].iter().rev());

    let weights = hann_window(window);
    let total: f64 = weights.iter().sum();

    let offset = window / 2;
    let smoothed = (offset..offset + n)
        .map(|k| {
            weights
                .iter()
                .zip(&padded[k..k + window])
                .map(|(w, s)| w * s)
                .sum::<f64>()
                / total
        })
        .collect();
    Ok(smoothed)
}

/// Finds the knee of the sorted dispersion curve and selects the scores
/// above it.
///
/// At most `max_regions_percentage` of the scores can be selected: the knee
/// is only searched in that tail of the curve.
///
/// # Errors
/// * `HaystackError::InvalidParameter` if `max_regions_percentage` is not in (0, 1]
/// * `HaystackError::InvalidInput` if a score is not finite
/// * `HaystackError::NumericDegeneracy` if all scores are equal, the curve is
///   shorter than the smoothing window, or no position of the tail rises
///   above the 45° line
pub fn find_knee(scores: &[f64], max_regions_percentage: f64) -> Result<KneeSelection> {
    if !(max_regions_percentage > 0.0 && max_regions_percentage <= 1.0) {
        return Err(HaystackError::invalid_parameter(
            "max_regions_percentage",
            max_regions_percentage,
            "must be in (0, 1]",
        ));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(HaystackError::InvalidInput(format!(
            "dispersion score {} is not finite",
            bad
        )));
    }

    let n = scores.len();
    let min_s = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max_s = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max_s - min_s;
    if n < 2 || range <= 0.0 {
        return Err(HaystackError::degenerate(
            "dispersion profile is flat, there is no knee to find",
        ));
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);

    let dx = 1.0 / (n - 1) as f64;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * dx).collect();
    let y: Vec<f64> = sorted.iter().map(|s| (s - min_s) / range).collect();

    let derivative: Vec<f64> = y.windows(2).map(|w| (w[1] - w[0]) / dx).collect();
    let slope: Vec<f64> = smooth(&derivative, SMOOTHING_WINDOW)?
        .into_iter()
        .map(|m| m - 1.0)
        .collect();

    let excluded_head = (slope.len() as f64 * (1.0 - max_regions_percentage)) as usize;
    let best = slope
        .iter()
        .enumerate()
        .skip(excluded_head)
        .filter(|(_, m)| **m > 0.0)
        .fold(None, |best: Option<(usize, f64)>, (i, &m)| match best {
            Some((_, b)) if b <= m => best,
            _ => Some((i, m)),
        });

    let (argmin, _) = best.ok_or_else(|| {
        HaystackError::degenerate(
            "no position in the allowed tail rises above the 45 degree line",
        )
    })?;

    let knee_index = argmin + 1;
    let threshold = sorted[knee_index];
    let selected: Vec<bool> = scores.iter().map(|s| *s > threshold).collect();

    let selection = KneeSelection {
        x,
        y,
        slope,
        knee_index,
        threshold,
        selected,
    };
    debug!(
        "Knee at {} of {} (threshold {})",
        knee_index, n, threshold
    );
    info!(
        "Selected {:.4}% regions ({})",
        selection.n_selected() as f64 / n as f64 * 100.0,
        selection.n_selected()
    );
    Ok(selection)
}
