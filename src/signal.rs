//! Per-bin signal tables.

use crate::error::{HaystackError, Result};
use log::{debug, info};
use ndarray::{Array2, ArrayView1, Axis};
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Per-bin values for a set of samples: rows are genomic bins in the order of
/// the tiled-genome bin file, columns are samples.
///
/// Every pipeline stage produces a new matrix rather than mutating its input.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMatrix {
    values: Array2<f64>,
    samples: Vec<String>,
}

impl SignalMatrix {
    /// # Errors
    /// * `HaystackError::InvalidInput` if there are no samples or no bins, the
    ///   name count does not match the column count, or a value is negative
    ///   or not finite
    pub fn new(values: Array2<f64>, samples: Vec<String>) -> Result<Self> {
        if values.ncols() == 0 || values.nrows() == 0 {
            return Err(HaystackError::InvalidInput(
                "Signal matrix needs at least one bin and one sample".into(),
            ));
        }
        if values.ncols() != samples.len() {
            return Err(HaystackError::InvalidInput(format!(
                "{} sample names for {} columns",
                samples.len(),
                values.ncols()
            )));
        }
        if let Some(((row, col), v)) = values
            .indexed_iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(HaystackError::InvalidInput(format!(
                "Invalid value {} for sample {} at bin {}",
                v, samples[col], row
            )));
        }
        Ok(SignalMatrix { values, samples })
    }

    /// Builds a matrix from one track per sample.
    ///
    /// # Errors
    /// * `HaystackError::InvalidInput` if the tracks differ in length
    pub fn from_tracks(samples: Vec<String>, tracks: Vec<Vec<f64>>) -> Result<Self> {
        let n_bins = tracks.first().map_or(0, Vec::len);
        if let Some((idx, track)) = tracks.iter().enumerate().find(|(_, t)| t.len() != n_bins) {
            return Err(HaystackError::InvalidInput(format!(
                "Track for {} has {} bins, expected {}",
                samples.get(idx).map_or("?", String::as_str),
                track.len(),
                n_bins
            )));
        }
        let mut values = Array2::<f64>::zeros((n_bins, tracks.len()));
        for (col, track) in tracks.iter().enumerate() {
            for (row, v) in track.iter().enumerate() {
                values[[row, col]] = *v;
            }
        }
        SignalMatrix::new(values, samples)
    }

    /// Same samples, new values. Used by stages that keep the shape.
    pub(crate) fn with_values(&self, values: Array2<f64>) -> Self {
        debug_assert_eq!(values.ncols(), self.samples.len());
        SignalMatrix {
            values,
            samples: self.samples.clone(),
        }
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_bins(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(idx)
    }

    pub fn row(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    /// Applies `f` to every cell and returns the result as a new matrix
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        self.with_values(self.values.mapv(f))
    }

    /// The rows at `indices`, in that order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        self.with_values(self.values.select(Axis(0), indices))
    }

    /// Linear-interpolated percentile of every column, `q` in [0, 100]
    pub fn column_percentiles(&self, q: f64) -> Vec<f64> {
        self.values
            .columns()
            .into_iter()
            .map(|col| percentile(&col.to_vec(), q))
            .collect()
    }
}

/// Percentile with linear interpolation between closest ranks, the numpy default.
/// NaN for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Loads a per-bin track: one number per line, no header.
///
/// # Errors
/// * `HaystackError::InvalidFileFormat` if a line is not a number
pub fn load_track(filename: impl AsRef<Path>) -> Result<Vec<f64>> {
    let filename = filename.as_ref();
    let df = LazyCsvReader::new(filename)
        .with_has_header(false)
        .finish()?
        .collect()?;

    let column = df.column("column_1")?.cast(&DataType::Float64)?;
    let track = column
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(line, v)| {
            v.ok_or_else(|| {
                HaystackError::InvalidFileFormat(format!(
                    "{}: line {} is not a number",
                    filename.display(),
                    line + 1
                ))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    debug!("Loaded {} bins from {}", track.len(), filename.display());
    Ok(track)
}

/// Loads one track per `(sample, path)` pair into a matrix.
pub fn load_signal_matrix(samples: &[(String, PathBuf)]) -> Result<SignalMatrix> {
    info!("Loading the processed tracks");
    let mut names = Vec::with_capacity(samples.len());
    let mut tracks = Vec::with_capacity(samples.len());
    for (name, path) in samples {
        info!("Loading {} from file {}", name, path.display());
        names.push(name.clone());
        tracks.push(load_track(path)?);
    }
    SignalMatrix::from_tracks(names, tracks)
}

/// Reads a sample sheet: `name<whitespace>path` per line, `#` comments and
/// blank lines ignored.
///
/// # Errors
/// * `HaystackError::InvalidFileFormat` if a line does not have exactly two fields
///   or the sheet lists no samples
pub fn read_sample_sheet(filename: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>> {
    let reader = BufReader::new(File::open(filename)?);
    let mut samples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [name, path] => samples.push((name.to_string(), PathBuf::from(path))),
            _ => {
                return Err(HaystackError::InvalidFileFormat(format!(
                    "Sample sheet line {} has {} fields, expected 2",
                    idx + 1,
                    fields.len()
                )))
            }
        }
    }
    if samples.is_empty() {
        return Err(HaystackError::InvalidFileFormat("Sample sheet is empty".into()));
    }
    Ok(samples)
}
