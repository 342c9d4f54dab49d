//! Scoring DNA sequences against a PWM on both strands.

use crate::error::{HaystackError, Result};
use crate::pwm::Pwm;
use crate::types::{base_index, MotifHit, Strand};
use serde::{Deserialize, Serialize};

/// Fraction of the maximum score used when no threshold is given
pub const DEFAULT_THRESHOLD_FRACTION: f64 = 0.7;

/// Score a window must strictly exceed to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScanThreshold {
    Absolute(f64),
    /// Fraction of the best score the matrix can reach
    FractionOfMax(f64),
}

impl Default for ScanThreshold {
    fn default() -> Self {
        ScanThreshold::FractionOfMax(DEFAULT_THRESHOLD_FRACTION)
    }
}

impl ScanThreshold {
    /// Threshold in score units for a matrix whose best score is `max_score`
    pub fn resolve(&self, max_score: f64) -> f64 {
        match *self {
            ScanThreshold::Absolute(t) => t,
            ScanThreshold::FractionOfMax(f) => f * max_score,
        }
    }
}

/// Totals over every window of a sequence, see [`scan_sum`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanSummary {
    pub total: f64,
    pub hits: usize,
    pub average: f64,
    /// `ln Σ exp(score)` over the counted windows
    pub log_sum_exp: f64,
}

/// Letter indices of `sequence`, upper-casing first. With `allow_n`,
/// `N` becomes `None`; any other symbol is an error.
fn encode(sequence: &str, allow_n: bool) -> Result<Vec<Option<usize>>> {
    sequence
        .chars()
        .enumerate()
        .map(|(pos, base)| match base_index(base) {
            Some(idx) => Ok(Some(idx)),
            None if allow_n && base.eq_ignore_ascii_case(&'N') => Ok(None),
            None => Err(HaystackError::invalid_sequence(
                pos,
                format!("symbol '{}' cannot be scored", base),
            )),
        })
        .collect()
}

/// Forward and reverse-strand scores of the window at `offset`, `None` if
/// the window covers an unknown base
fn window_score(pwm: &Pwm, codes: &[Option<usize>], offset: usize) -> Option<(f64, f64)> {
    let width = pwm.width();
    let mut forward = 0.0;
    let mut reverse = 0.0;
    for i in 0..width {
        let idx = codes[offset + i]?;
        forward += pwm.score_at(i, idx);
        // complement of index k in ACGT order is 3 - k
        reverse += pwm.score_at(width - 1 - i, 3 - idx);
    }
    Some((forward, reverse))
}

fn oriented(forward: f64, reverse: f64) -> (f64, Strand) {
    if forward >= reverse {
        (forward, Strand::Forward)
    } else {
        (reverse, Strand::Reverse)
    }
}

fn hit(sequence: &str, position: usize, end: usize, score: f64, strand: Strand) -> MotifHit {
    MotifHit {
        position,
        end,
        text: sequence[position..end].to_string(),
        score,
        strand,
    }
}

fn scan_codes(
    pwm: &Pwm,
    sequence: &str,
    codes: &[Option<usize>],
    threshold: ScanThreshold,
) -> Vec<MotifHit> {
    let width = pwm.width();
    if codes.len() < width {
        return scan_smaller(pwm, sequence, codes, threshold).into_iter().collect();
    }
    let cutoff = threshold.resolve(pwm.max_score());

    (0..=codes.len() - width)
        .filter_map(|offset| {
            let (forward, reverse) = window_score(pwm, codes, offset)?;
            let (score, strand) = oriented(forward, reverse);
            (score > cutoff).then(|| hit(sequence, offset, offset + width, score, strand))
        })
        .collect()
}

/// The sequence is shorter than the matrix: slides the sequence along the
/// matrix and keeps the best offset that clears its threshold. Fractional
/// thresholds are relative to the best score of the overlapped positions.
fn scan_smaller(
    pwm: &Pwm,
    sequence: &str,
    codes: &[Option<usize>],
    threshold: ScanThreshold,
) -> Option<MotifHit> {
    let n = codes.len();
    let width = pwm.width();
    if n == 0 || codes.iter().any(Option::is_none) {
        return None;
    }

    let mut best: Option<MotifHit> = None;
    for offset in 0..=width - n {
        let sub_max: f64 = (offset..offset + n)
            .map(|i| {
                (0..4)
                    .map(|j| pwm.score_at(i, j))
                    .fold(f64::NEG_INFINITY, f64::max)
            })
            .sum();
        let cutoff = threshold.resolve(sub_max);

        let mut forward = 0.0;
        let mut reverse = 0.0;
        for (i, idx) in codes.iter().flatten().enumerate() {
            forward += pwm.score_at(offset + i, *idx);
            reverse += pwm.score_at(width - 1 - (offset + i), 3 - idx);
        }
        let (score, strand) = oriented(forward, reverse);
        if score > cutoff && best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(hit(sequence, 0, n, score, strand));
        }
    }
    best
}

/// Scans `sequence` with `pwm` on both strands.
///
/// Every window scoring strictly above the threshold is reported once, with
/// the strand that scored higher (forward on ties). Lowercase input is
/// accepted.
///
/// # Errors
/// * `HaystackError::InvalidSequence` for any symbol other than A, C, G, T
///
/// # Example
/// ```ignore
/// let hits = scan(&pwm, "AAACGTAAA", ScanThreshold::Absolute(0.0))?;
/// assert_eq!(hits[0].position, 3);
/// ```
pub fn scan(pwm: &Pwm, sequence: &str, threshold: ScanThreshold) -> Result<Vec<MotifHit>> {
    let codes = encode(sequence, false)?;
    Ok(scan_codes(pwm, sequence, &codes, threshold))
}

/// Like [`scan`], but windows overlapping an `N` are skipped instead of
/// rejected. Used on genome extracts where masked or unknown bases are `n`.
pub fn scan_skipping_n(
    pwm: &Pwm,
    sequence: &str,
    threshold: ScanThreshold,
) -> Result<Vec<MotifHit>> {
    let codes = encode(sequence, true)?;
    Ok(scan_codes(pwm, sequence, &codes, threshold))
}

/// The single best-scoring window of `sequence`, whatever its score.
/// `None` for an empty sequence.
pub fn best_match(pwm: &Pwm, sequence: &str) -> Result<Option<MotifHit>> {
    let codes = encode(sequence, false)?;
    let width = pwm.width();
    if codes.len() < width {
        return Ok(scan_smaller(
            pwm,
            sequence,
            &codes,
            ScanThreshold::Absolute(f64::NEG_INFINITY),
        ));
    }

    let mut best: Option<MotifHit> = None;
    for offset in 0..=codes.len() - width {
        if let Some((forward, reverse)) = window_score(pwm, &codes, offset) {
            let (score, strand) = oriented(forward, reverse);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(hit(sequence, offset, offset + width, score, strand));
            }
        }
    }
    Ok(best)
}

/// Sums the better-strand score of every window scoring at least
/// `threshold`.
pub fn scan_sum(pwm: &Pwm, sequence: &str, threshold: f64) -> Result<ScanSummary> {
    let codes = encode(sequence, false)?;
    let width = pwm.width();
    let scores: Vec<f64> = if codes.len() < width {
        Vec::new()
    } else {
        (0..=codes.len() - width)
            .filter_map(|offset| window_score(pwm, &codes, offset))
            .map(|(forward, reverse)| forward.max(reverse))
            .filter(|score| *score >= threshold)
            .collect()
    };

    let total: f64 = scores.iter().sum();
    let hits = scores.len();
    let average = if hits == 0 { 0.0 } else { total / hits as f64 };
    let peak = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let log_sum_exp = if hits == 0 {
        f64::NEG_INFINITY
    } else {
        peak + scores.iter().map(|s| (s - peak).exp()).sum::<f64>().ln()
    };

    Ok(ScanSummary {
        total,
        hits,
        average,
        log_sum_exp,
    })
}

/// Returns a copy of `sequence` with every window matching `pwm` replaced
/// by `N`s. The length is unchanged.
pub fn mask(pwm: &Pwm, sequence: &str, threshold: ScanThreshold) -> Result<String> {
    let hits = scan(pwm, sequence, threshold)?;
    let mut masked: Vec<char> = sequence.chars().collect();
    for hit in &hits {
        masked[hit.position..hit.end].fill('N');
    }
    Ok(masked.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::Background;

    fn acgt() -> Pwm {
        Pwm::from_alignment(&["ACGT"; 4], Background::uniform(), 0.0).unwrap()
    }

    #[test]
    fn unknown_symbols_are_rejected_or_skipped() {
        let pwm = acgt();
        let err = scan(&pwm, "ACGNACGT", ScanThreshold::Absolute(0.0)).unwrap_err();
        assert!(matches!(err, HaystackError::InvalidSequence { position: 3, .. }));

        let hits = scan_skipping_n(&pwm, "ACGNACGT", ScanThreshold::Absolute(0.0)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 4);
    }

    #[test]
    fn short_sequence_scores_against_the_overlapping_positions() {
        let pwm = acgt();
        let best = scan(&pwm, "CG", ScanThreshold::default()).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].text, "CG");
        assert!((best[0].score - 4.0).abs() < 1e-12);
    }
}
