//! Background region sets matched to the GC content of a target set.

use crate::coordinate::Coordinate;
use crate::error::{HaystackError, Result};
use crate::fasta::gc_fraction;
use crate::genome::SequenceProvider;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Bins holding less than this share of the targets do not constrain the
/// matching factor
const MIN_BIN_SHARE: f64 = 0.05;

/// `n_bins` evenly spaced edges over [0, 1], plus an open last edge.
///
/// The GC value 1.0 therefore lands in a bin of its own.
pub fn gc_bin_edges(n_bins: usize) -> Result<Vec<f64>> {
    if n_bins < 2 {
        return Err(HaystackError::invalid_parameter(
            "c_g_bins",
            n_bins,
            "at least two bins are needed",
        ));
    }
    let mut edges: Vec<f64> = (0..n_bins)
        .map(|i| i as f64 / (n_bins - 1) as f64)
        .collect();
    edges.push(f64::INFINITY);
    Ok(edges)
}

/// Bin of `value`: bins are half-open except the last, which is closed
pub fn gc_bin(value: f64, edges: &[f64]) -> Option<usize> {
    let n_bins = edges.len().checked_sub(1)?;
    if n_bins == 0 || value.is_nan() || value < edges[0] || value > edges[n_bins] {
        return None;
    }
    let idx = edges.partition_point(|e| *e <= value);
    Some(idx.saturating_sub(1).min(n_bins - 1))
}

pub fn gc_histogram(values: &[f64], edges: &[f64]) -> Vec<usize> {
    let mut hist = vec![0; edges.len().saturating_sub(1)];
    for bin in values.iter().filter_map(|v| gc_bin(*v, edges)) {
        hist[bin] += 1;
    }
    hist
}

/// GC fraction of every region
pub fn region_gc_content<G: SequenceProvider + ?Sized>(
    regions: &[Coordinate],
    genome: &G,
) -> Result<Vec<f64>> {
    regions
        .iter()
        .map(|c| genome.extract_sequence(c, false).map(|s| gc_fraction(&s)))
        .collect()
}

/// Picks candidate background regions so that their GC histogram is a
/// multiple of the target histogram.
///
/// The multiple is `bg_target_ratio`, lowered to the scarcest candidate
/// bin among the bins holding more than 5% of the targets. Returns the
/// indices of the chosen candidates.
///
/// # Errors
/// * `HaystackError::InvalidInput` if either set is empty
/// * `HaystackError::NumericDegeneracy` if no well-populated target bin has
///   any candidate
pub fn sample_gc_matched_background(
    target_gc: &[f64],
    candidate_gc: &[f64],
    bg_target_ratio: f64,
    n_bins: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    if target_gc.is_empty() || candidate_gc.is_empty() {
        return Err(HaystackError::InvalidInput(
            "GC matching needs non-empty target and candidate sets".into(),
        ));
    }
    let edges = gc_bin_edges(n_bins)?;
    let target_hist = gc_histogram(target_gc, &edges);
    let candidate_hist = gc_histogram(candidate_gc, &edges);
    debug!("original:{:?}", target_hist);
    debug!("bg:{:?}", candidate_hist);

    let n_target = target_gc.len() as f64;
    let bin_ratios: Vec<f64> = target_hist
        .iter()
        .zip(&candidate_hist)
        .filter(|(t, c)| **t > 0 && **c > 0 && **t as f64 / n_target > MIN_BIN_SHARE)
        .map(|(t, c)| *c as f64 / *t as f64)
        .collect();
    if bin_ratios.is_empty() {
        return Err(HaystackError::degenerate(
            "the background shares no populated GC bin with the target",
        ));
    }
    let k_match = bin_ratios.into_iter().fold(bg_target_ratio, f64::min);
    debug!("K_MATCH:{}", k_match);

    let to_match: Vec<usize> = target_hist
        .iter()
        .map(|t| (k_match * *t as f64).floor() as usize)
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut selected = Vec::new();
    for (bin, &wanted) in to_match.iter().enumerate() {
        let mut in_bin: Vec<usize> = candidate_gc
            .iter()
            .enumerate()
            .filter(|(_, gc)| gc_bin(**gc, &edges) == Some(bin))
            .map(|(idx, _)| idx)
            .collect();
        in_bin.shuffle(&mut rng);
        in_bin.truncate(wanted);
        selected.extend(in_bin);
    }
    selected.sort_unstable();

    let obtained = gc_histogram(
        &selected.iter().map(|&i| candidate_gc[i]).collect::<Vec<_>>(),
        &edges,
    );
    if obtained == to_match {
        info!(
            "C+G content perfectly matched! target:{:?} bg:{:?}",
            target_hist, obtained
        );
    } else {
        warn!(
            "C+G content not perfectly matched target:{:?} bg:{:?}",
            target_hist, obtained
        );
    }
    Ok(selected)
}

/// Random start for a region of `len` bases on a chromosome of `chrom_len`
fn random_start(rng: &mut StdRng, chrom_len: u64, len: u64) -> Option<u64> {
    (chrom_len >= len).then(|| rng.gen_range(0..=chrom_len - len))
}

fn chromosome_length<G: SequenceProvider + ?Sized>(genome: &G, chrom: &str) -> Result<u64> {
    genome
        .chromosome_length(chrom)
        .ok_or_else(|| HaystackError::InvalidInput(format!("Unknown chromosome {}", chrom)))
}

/// One random region per target, same chromosome and length.
pub fn random_background<G: SequenceProvider + ?Sized>(
    targets: &[Coordinate],
    genome: &G,
    seed: u64,
) -> Result<Vec<Coordinate>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut background = Vec::with_capacity(targets.len());
    for target in targets {
        let chrom_len = chromosome_length(genome, &target.chrom)?;
        let start = random_start(&mut rng, chrom_len, target.len()).ok_or_else(|| {
            HaystackError::InvalidInput(format!("{} is longer than its chromosome", target))
        })?;
        background.push(Coordinate::new(
            target.chrom.clone(),
            start,
            start + target.len(),
        ));
    }
    Ok(background)
}

/// Draws `ratio` random regions per target, each on the target's chromosome
/// with the target's length and GC bin.
///
/// Every target gets at most `max_tries` draws per round; targets that could
/// not be matched are left out and reported with a warning.
pub fn random_gc_matched_background<G: SequenceProvider + ?Sized>(
    targets: &[Coordinate],
    genome: &G,
    ratio: usize,
    n_bins: usize,
    max_tries: usize,
    seed: u64,
) -> Result<Vec<Coordinate>> {
    let edges = gc_bin_edges(n_bins)?;
    let target_gc = region_gc_content(targets, genome)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut background = Vec::with_capacity(targets.len() * ratio);
    let mut unmatched = 0usize;
    for _ in 0..ratio {
        for (target, gc) in targets.iter().zip(&target_gc) {
            let wanted = gc_bin(*gc, &edges);
            let chrom_len = chromosome_length(genome, &target.chrom)?;

            let mut found = None;
            for _ in 0..max_tries {
                let Some(start) = random_start(&mut rng, chrom_len, target.len()) else {
                    break;
                };
                let candidate =
                    Coordinate::new(target.chrom.clone(), start, start + target.len());
                let seq = genome.extract_sequence(&candidate, false)?;
                if gc_bin(gc_fraction(&seq), &edges) == wanted {
                    found = Some(candidate);
                    break;
                }
            }
            match found {
                Some(c) => background.push(c),
                None => unmatched += 1,
            }
        }
    }

    if unmatched > 0 {
        warn!(
            "C+G content not perfectly matched: {} draws found no region in the target bin",
            unmatched
        );
    }
    let bg_gc = region_gc_content(&background, genome)?;
    debug!("original:{:?}", gc_histogram(&target_gc, &edges));
    debug!("obtained:{:?}", gc_histogram(&bg_gc, &edges));
    Ok(background)
}

/// Keeps `n` regions chosen at random, or all of them if there are fewer.
/// Input order is preserved.
pub fn downsample(regions: &[Coordinate], n: usize, seed: u64) -> Vec<Coordinate> {
    if regions.len() <= n {
        return regions.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, regions.len(), n).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| regions[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_close_with_an_open_bin() {
        let edges = gc_bin_edges(5).unwrap();
        assert_eq!(edges.len(), 6);
        assert_eq!(gc_bin(0.0, &edges), Some(0));
        assert_eq!(gc_bin(0.3, &edges), Some(1));
        assert_eq!(gc_bin(0.25, &edges), Some(1));
        assert_eq!(gc_bin(1.0, &edges), Some(4));
        assert_eq!(gc_bin(-0.1, &edges), None);
    }
}
