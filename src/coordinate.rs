//! Genomic intervals.
//!
//! Coordinates are 0-based and half-open (`[start, end)`), the BED
//! convention, everywhere in the crate.

use crate::error::{HaystackError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::Path;

/// An immutable genomic interval with optional BED name, score and strand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinate {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
    pub score: Option<f64>,
    pub strand: Option<char>,
}

impl Coordinate {
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Self {
        Coordinate {
            chrom: chrom.into(),
            start,
            end,
            name: None,
            score: None,
            strand: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn center(&self) -> u64 {
        (self.start + self.end) / 2
    }

    /// Sort key of the chromosome: the number after an optional `chr` prefix
    /// when it parses, else the sum of the name's bytes.
    pub fn chrom_key(&self) -> u64 {
        let id = self.chrom.strip_prefix("chr").unwrap_or(&self.chrom);
        id.parse::<u64>()
            .unwrap_or_else(|_| id.bytes().map(u64::from).sum())
    }

    /// A window of `window` bp centred on this interval, keeping the
    /// name, score and strand. Odd windows are rounded up to even.
    pub fn around_center(&self, window: u64) -> Coordinate {
        let half = window.div_ceil(2);
        let center = self.center();
        Coordinate {
            chrom: self.chrom.clone(),
            start: center.saturating_sub(half),
            end: center + half,
            name: self.name.clone(),
            score: self.score,
            strand: self.strand,
        }
    }

    /// The `offset` bp immediately before the interval on the + strand,
    /// clamped at 0
    pub fn upstream(&self, offset: u64) -> Coordinate {
        Coordinate::new(self.chrom.clone(), self.start.saturating_sub(offset), self.start)
    }

    /// The `offset` bp immediately after the interval on the + strand
    pub fn downstream(&self, offset: u64) -> Coordinate {
        Coordinate::new(self.chrom.clone(), self.end, self.end + offset)
    }

    pub fn intersection(&self, other: &Coordinate) -> Option<Coordinate> {
        if self.chrom != other.chrom || self.end <= other.start || other.end <= self.start {
            return None;
        }
        Some(Coordinate::new(
            self.chrom.clone(),
            self.start.max(other.start),
            self.end.min(other.end),
        ))
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.chrom == other.chrom && self.start == other.start && self.end == other.end
    }
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chrom.hash(state);
        self.start.hash(state);
        self.end.hash(state);
    }
}

impl Ord for Coordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chrom_key()
            .cmp(&other.chrom_key())
            .then_with(|| self.chrom.cmp(&other.chrom))
            .then_with(|| self.start.cmp(&other.start))
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for Coordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// Sorts the intervals and coalesces overlapping or book-ended ones per
/// chromosome. Names, scores and strands are dropped from merged output.
pub fn merge_coordinates(coords: &[Coordinate]) -> Vec<Coordinate> {
    let mut sorted: Vec<&Coordinate> = coords.iter().collect();
    sorted.sort();

    let mut merged: Vec<Coordinate> = Vec::with_capacity(sorted.len());
    for c in sorted {
        match merged.last_mut() {
            Some(last) if last.chrom == c.chrom && c.start <= last.end => {
                last.end = last.end.max(c.end);
            }
            _ => merged.push(Coordinate::new(c.chrom.clone(), c.start, c.end)),
        }
    }
    merged
}

/// Reads a BED file (tab separated, no header) into coordinates.
///
/// The first three columns are required; column 4 is taken as the name
/// and column 5 as the score when present.
///
/// # Errors
/// * `HaystackError::InvalidFileFormat` if fewer than three columns are present
///   or a start/end is missing
/// * `HaystackError::InvalidInput` if an interval has `end < start`
pub fn read_bed(filename: impl AsRef<Path>) -> Result<Vec<Coordinate>> {
    let df = LazyCsvReader::new(filename.as_ref())
        .with_has_header(false)
        .with_separator(b'\t')
        .finish()?
        .collect()?;

    if df.width() < 3 {
        return Err(HaystackError::InvalidFileFormat(format!(
            "BED file needs at least 3 columns, found {}",
            df.width()
        )));
    }

    let chroms = df.column("column_1")?.cast(&DataType::String)?;
    let starts = df.column("column_2")?.cast(&DataType::Int64)?;
    let ends = df.column("column_3")?.cast(&DataType::Int64)?;
    let names = if df.width() >= 4 {
        Some(df.column("column_4")?.cast(&DataType::String)?)
    } else {
        None
    };
    let scores = if df.width() >= 5 {
        Some(df.column("column_5")?.cast(&DataType::Float64)?)
    } else {
        None
    };

    let chroms = chroms.str()?;
    let starts = starts.i64()?;
    let ends = ends.i64()?;
    let names = names.as_ref().map(|c| c.str()).transpose()?;
    let scores = scores.as_ref().map(|c| c.f64()).transpose()?;

    let mut coords = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (chrom, start, end) = match (chroms.get(idx), starts.get(idx), ends.get(idx)) {
            (Some(chrom), Some(start), Some(end)) => (chrom, start, end),
            _ => {
                return Err(HaystackError::InvalidFileFormat(format!(
                    "BED line {} is missing chrom, start or end",
                    idx + 1
                )))
            }
        };
        if start < 0 || end < start {
            return Err(HaystackError::InvalidInput(format!(
                "BED line {}: invalid interval {}-{}",
                idx + 1,
                start,
                end
            )));
        }
        let mut coord = Coordinate::new(chrom, start as u64, end as u64);
        coord.name = names.and_then(|n| n.get(idx)).map(str::to_string);
        coord.score = scores.and_then(|s| s.get(idx));
        coords.push(coord);
    }

    Ok(coords)
}

/// Writes coordinates as a 3-column BED file, or BED6 with `minimal = false`
pub fn write_bed(coords: &[Coordinate], filename: impl AsRef<Path>, minimal: bool) -> Result<()> {
    let mut file = BufWriter::new(File::create(filename)?);
    for c in coords {
        if minimal {
            writeln!(file, "{}\t{}\t{}", c.chrom, c.start, c.end)?;
        } else {
            writeln!(
                file,
                "{}\t{}\t{}\t{}\t{}\t{}",
                c.chrom,
                c.start,
                c.end,
                c.name.as_deref().unwrap_or("."),
                c.score.map_or_else(|| "0".to_string(), |s| s.to_string()),
                c.strand.unwrap_or('.')
            )?;
        }
    }
    file.flush()?;
    Ok(())
}

/// Writes `(coordinate, value)` rows as a bedgraph
pub fn write_bedgraph<'a, I>(rows: I, filename: impl AsRef<Path>) -> Result<()>
where
    I: IntoIterator<Item = (&'a Coordinate, f64)>,
{
    let mut file = BufWriter::new(File::create(filename)?);
    for (c, value) in rows {
        writeln!(file, "{}\t{}\t{}\t{}", c.chrom, c.start, c.end, value)?;
    }
    file.flush()?;
    Ok(())
}
