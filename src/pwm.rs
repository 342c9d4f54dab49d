//! Position weight matrices: construction, log-odds derivation and the
//! derived views (information content, consensus, reverse complement).

use crate::error::{HaystackError, Result};
use crate::types::{base_index, ALPHABET, TWO_TO_ONE};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pseudocount weight applied to motif database entries unless overridden
pub const DEFAULT_PSEUDOCOUNT: f64 = 0.01;

/// Log-odds given to a letter with zero probability. Only reachable with a
/// pseudocount of 0.
pub const LOG_ODDS_FLOOR: f64 = -100.0;

const BACKGROUND_TOLERANCE: f64 = 1e-6;

/// Nucleotide background distribution in A, C, G, T order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Background([f64; 4]);

impl Background {
    /// # Errors
    /// * `HaystackError::InvalidParameter` unless all four frequencies are
    ///   strictly positive and sum to 1
    pub fn new(frequencies: [f64; 4]) -> Result<Self> {
        if let Some(f) = frequencies.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(HaystackError::invalid_parameter(
                "background",
                f,
                "frequencies must be strictly positive",
            ));
        }
        let total: f64 = frequencies.iter().sum();
        if (total - 1.0).abs() > BACKGROUND_TOLERANCE {
            return Err(HaystackError::invalid_parameter(
                "background",
                total,
                "frequencies must sum to 1",
            ));
        }
        Ok(Background(frequencies))
    }

    /// Rescales positive frequencies to sum to 1. Motif files print them
    /// rounded, so they rarely sum to exactly 1.
    pub fn normalized(frequencies: [f64; 4]) -> Result<Self> {
        let total: f64 = frequencies.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(HaystackError::invalid_parameter(
                "background",
                total,
                "frequencies must have a positive total",
            ));
        }
        Background::new(frequencies.map(|f| f / total))
    }

    pub fn uniform() -> Self {
        Background([0.25; 4])
    }

    pub fn frequencies(&self) -> &[f64; 4] {
        &self.0
    }

    /// Frequency of the letter at `index` in [`ALPHABET`]
    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    /// Shannon entropy of the background in bits
    pub fn entropy(&self) -> f64 {
        -self.0.iter().map(|b| b * b.log2()).sum::<f64>()
    }
}

impl Default for Background {
    fn default() -> Self {
        Background::uniform()
    }
}

/// A DNA motif as a `width x 4` matrix in A, C, G, T column order.
///
/// The raw counts are kept alongside the derived probabilities and log-odds
/// so the matrix can be re-derived for another background.
#[derive(Debug, Clone, PartialEq)]
pub struct Pwm {
    counts: Array2<f64>,
    probabilities: Array2<f64>,
    log_odds: Array2<f64>,
    background: Background,
    pseudocount: f64,
}

impl Pwm {
    /// Builds a PWM by tallying the letters of an ungapped alignment.
    ///
    /// `N` (either case) marks an unknown position and is not counted.
    ///
    /// # Arguments
    /// * `sequences` - Aligned sites, all of the same length
    /// * `background` - Letter distribution used for pseudocounts and log-odds
    /// * `pseudocount` - Pseudocount weight β, 0 disables pseudocounts
    ///
    /// # Errors
    /// * `HaystackError::InvalidInput` if the alignment is empty or ragged
    /// * `HaystackError::InvalidSequence` for a letter outside ACGTN
    /// * `HaystackError::InvalidPwm` if every position is `N`
    ///
    /// # Example
    /// ```ignore
    /// use haystack_rs::pwm::{Background, Pwm};
    ///
    /// let pwm = Pwm::from_alignment(&["ACGT", "ACGT"], Background::uniform(), 0.0).unwrap();
    /// assert_eq!(pwm.consensus(), "ACGT");
    /// ```
    pub fn from_alignment<S: AsRef<str>>(
        sequences: &[S],
        background: Background,
        pseudocount: f64,
    ) -> Result<Self> {
        let first = sequences
            .first()
            .ok_or_else(|| HaystackError::InvalidInput("Empty alignment".into()))?;
        let width = first.as_ref().len();
        if width == 0 {
            return Err(HaystackError::InvalidInput(
                "Alignment sequences are empty".into(),
            ));
        }

        let mut counts = Array2::<f64>::zeros((width, 4));
        for (n, seq) in sequences.iter().enumerate() {
            let seq = seq.as_ref();
            if seq.len() != width {
                return Err(HaystackError::InvalidInput(format!(
                    "Sequence {} has length {}, expected {}",
                    n,
                    seq.len(),
                    width
                )));
            }
            for (pos, base) in seq.chars().enumerate() {
                match base_index(base) {
                    Some(idx) => counts[[pos, idx]] += 1.0,
                    None if base.eq_ignore_ascii_case(&'N') => {}
                    None => {
                        return Err(HaystackError::invalid_sequence(
                            pos,
                            format!("letter '{}' in aligned sequence {}", base, n),
                        ))
                    }
                }
            }
        }

        Pwm::from_counts(counts, background, pseudocount)
    }

    /// Builds a PWM from a `width x 4` count (or probability) matrix.
    ///
    /// Columns with a smaller total than the largest column are padded with
    /// background-weighted counts. For `pseudocount > 0` every count `c` of a
    /// column with total `N` becomes `(c + β·bg·N) / (1 + β)`, which is
    /// independent of the scale of the matrix.
    ///
    /// # Errors
    /// * `HaystackError::InvalidPwm` for a malformed matrix
    /// * `HaystackError::InvalidParameter` for a negative pseudocount
    pub fn from_counts(counts: Array2<f64>, background: Background, pseudocount: f64) -> Result<Self> {
        if !(pseudocount.is_finite() && pseudocount >= 0.0) {
            return Err(HaystackError::invalid_parameter(
                "pseudocount",
                pseudocount,
                "must be finite and non-negative",
            ));
        }
        let (width, letters) = counts.dim();
        if letters != 4 {
            return Err(HaystackError::invalid_pwm(format!(
                "expected 4 columns (A, C, G, T), found {}",
                letters
            )));
        }
        if width == 0 {
            return Err(HaystackError::invalid_pwm("matrix has no positions"));
        }
        if counts.iter().any(|c| !(c.is_finite() && *c >= 0.0)) {
            return Err(HaystackError::invalid_pwm(
                "counts must be finite and non-negative",
            ));
        }

        let (probabilities, log_odds) = derive(counts.view(), &background, pseudocount)?;
        Ok(Pwm {
            counts,
            probabilities,
            log_odds,
            background,
            pseudocount,
        })
    }

    pub fn width(&self) -> usize {
        self.counts.nrows()
    }

    /// Counts as given at construction
    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    pub fn probabilities(&self) -> &Array2<f64> {
        &self.probabilities
    }

    /// `log2(p / bg)` per position and letter
    pub fn log_odds(&self) -> &Array2<f64> {
        &self.log_odds
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn pseudocount(&self) -> f64 {
        self.pseudocount
    }

    /// Log-odds of `letter` (an index into [`ALPHABET`]) at `position`
    pub fn score_at(&self, position: usize, letter: usize) -> f64 {
        self.log_odds[[position, letter]]
    }

    /// Highest score any sequence can reach
    pub fn max_score(&self) -> f64 {
        self.log_odds
            .rows()
            .into_iter()
            .map(|row| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .sum()
    }

    pub fn min_score(&self) -> f64 {
        self.log_odds
            .rows()
            .into_iter()
            .map(|row| row.iter().copied().fold(f64::INFINITY, f64::min))
            .sum()
    }

    /// Shannon entropy of every column, in bits
    pub fn entropy(&self) -> Vec<f64> {
        self.probabilities
            .rows()
            .into_iter()
            .map(|row| -row.iter().map(|p| uncertainty(*p)).sum::<f64>())
            .collect()
    }

    /// Information content of every column relative to the background,
    /// floored at 0
    pub fn information_content(&self) -> Vec<f64> {
        let background_entropy = self.background.entropy();
        self.entropy()
            .into_iter()
            .map(|h| (background_entropy - h).max(0.0))
            .collect()
    }

    pub fn total_bits(&self) -> f64 {
        self.information_content().iter().sum()
    }

    /// IUPAC consensus. Columns under 0.25 bits print as `.`, columns under
    /// 1 bit in lowercase; when two letters are over-represented the
    /// two-letter ambiguity code is used.
    pub fn consensus(&self) -> String {
        self.information_content()
            .iter()
            .zip(self.log_odds.rows())
            .map(|(&bits, row)| {
                if bits < 0.25 {
                    return '.';
                }
                let mut lowercase = bits < 1.0;

                let mut ranked: Vec<(f64, usize)> =
                    row.iter().copied().zip(0..ALPHABET.len()).collect();
                ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
                let mut enriched: Vec<usize> = ranked
                    .iter()
                    .filter(|(ll, _)| *ll > 0.0)
                    .take(2)
                    .map(|(_, idx)| *idx)
                    .collect();
                if enriched.is_empty() {
                    enriched.push(ranked[0].1);
                    lowercase = true;
                }
                enriched.sort_unstable();

                let letter = match enriched.as_slice() {
                    [a, b] => {
                        let pair: String = [ALPHABET[*a], ALPHABET[*b]].iter().collect();
                        TWO_TO_ONE.get(pair.as_str()).copied().unwrap_or('N')
                    }
                    [a, ..] => ALPHABET[*a],
                    [] => 'N',
                };
                if lowercase {
                    letter.to_ascii_lowercase()
                } else {
                    letter
                }
            })
            .collect()
    }

    /// The motif as seen on the opposite strand: positions reversed and
    /// A/T, C/G swapped within each position. Probabilities and log-odds are
    /// re-derived from the flipped counts against the same background.
    pub fn reverse_complement(&self) -> Result<Pwm> {
        Pwm::from_counts(flip(&self.counts), self.background, self.pseudocount)
    }

    /// Re-derives probabilities and log-odds from the stored counts
    pub fn with_background(&self, background: Background) -> Result<Pwm> {
        Pwm::from_counts(self.counts.clone(), background, self.pseudocount)
    }

    /// Positions `offset..offset + len` as a PWM of their own
    pub fn sub_matrix(&self, offset: usize, len: usize) -> Result<Pwm> {
        if len == 0 || offset + len > self.width() {
            return Err(HaystackError::invalid_parameter(
                "sub_matrix",
                format!("{}..{}", offset, offset + len),
                format!("outside a matrix of width {}", self.width()),
            ));
        }
        let rows = s![offset..offset + len, ..];
        Ok(Pwm {
            counts: self.counts.slice(rows).to_owned(),
            probabilities: self.probabilities.slice(rows).to_owned(),
            log_odds: self.log_odds.slice(rows).to_owned(),
            background: self.background,
            pseudocount: self.pseudocount,
        })
    }
}

impl fmt::Display for Pwm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.consensus())
    }
}

/// A motif from a database, with its identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct MotifRecord {
    pub id: String,
    pub name: Option<String>,
    pub pwm: Pwm,
}

impl MotifRecord {
    /// `id` and `name` joined the way reports print them
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", self.id, name),
            None => self.id.clone(),
        }
    }
}

fn uncertainty(p: f64) -> f64 {
    if p > 0.0 {
        p * p.log2()
    } else {
        0.0
    }
}

fn flip(matrix: &Array2<f64>) -> Array2<f64> {
    matrix.slice(s![..;-1, ..;-1]).to_owned()
}

fn derive(
    counts: ArrayView2<f64>,
    background: &Background,
    pseudocount: f64,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let totals: Vec<f64> = counts.rows().into_iter().map(|r| r.sum()).collect();
    let n = totals.iter().copied().fold(0.0, f64::max);
    if n <= 0.0 {
        return Err(HaystackError::invalid_pwm("every position has a zero total"));
    }

    let mut probabilities = Array2::<f64>::zeros(counts.dim());
    for (i, row) in counts.rows().into_iter().enumerate() {
        let missing = n - totals[i];
        for (j, &c) in row.iter().enumerate() {
            let bg = background.get(j);
            let padded = c + missing * bg;
            let smoothed = (padded + pseudocount * bg * n) / (1.0 + pseudocount);
            probabilities[[i, j]] = smoothed / n;
        }
    }

    let log_odds = Array2::from_shape_fn(counts.dim(), |(i, j)| {
        let p = probabilities[[i, j]];
        if p > 0.0 {
            (p / background.get(j)).log2()
        } else {
            LOG_ODDS_FLOOR
        }
    });
    Ok((probabilities, log_odds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn short_columns_are_padded_with_background() {
        let counts = array![[4.0, 0.0, 0.0, 0.0], [1.0, 1.0, 0.0, 0.0]];
        let pwm = Pwm::from_counts(counts, Background::uniform(), 0.0).unwrap();
        let p = pwm.probabilities();
        assert!((p[[1, 0]] - 0.375).abs() < 1e-12);
        assert!((p[[1, 2]] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn zero_probability_gets_the_floor() {
        let pwm = Pwm::from_alignment(&["A"], Background::uniform(), 0.0).unwrap();
        assert_eq!(pwm.score_at(0, 1), LOG_ODDS_FLOOR);
        assert!((pwm.score_at(0, 0) - 2.0).abs() < 1e-12);
    }
}
