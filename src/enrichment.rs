//! Motif enrichment of a target region set over a background region set.

use crate::error::{HaystackError, Result};
use crate::pwm::MotifRecord;
use crate::qvalue::estimate_qvalues;
use crate::scan::{scan_skipping_n, ScanThreshold};
use crate::types::MotifHit;
use log::{debug, info};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Hypergeometric};
use std::ops::Range;

/// Relative tolerance when comparing table probabilities in Fisher's test
const FISHER_RELATIVE_TOLERANCE: f64 = 1e-7;

/// Region window scanned around every feature, and the inner window where a
/// hit counts as present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub window_length: usize,
    pub internal_window_length: usize,
}

impl ScanWindow {
    /// # Errors
    /// * `HaystackError::InvalidParameter` if the inner window is empty or
    ///   larger than the outer one
    pub fn new(window_length: usize, internal_window_length: usize) -> Result<Self> {
        if internal_window_length == 0 || internal_window_length > window_length {
            return Err(HaystackError::invalid_parameter(
                "internal_window_length",
                internal_window_length,
                format!("must be in 1..={}", window_length),
            ));
        }
        Ok(ScanWindow {
            window_length,
            internal_window_length,
        })
    }

    /// Positions of the inner window, centred in the outer one. An odd inner
    /// length is rounded up to even, as for [`Coordinate::around_center`].
    ///
    /// [`Coordinate::around_center`]: crate::coordinate::Coordinate::around_center
    pub fn internal_range(&self) -> Range<usize> {
        let half = self.window_length / 2;
        let inner_half = self.internal_window_length.div_ceil(2);
        half.saturating_sub(inner_half)..(half + inner_half).min(self.window_length)
    }
}

/// Hits of one motif over a set of regions.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionScan {
    pub motif_id: String,
    pub motif_name: Option<String>,
    /// Whether each region has a hit fully inside the inner window
    pub presence: Vec<bool>,
    /// Hits per position across all regions, over the full window
    pub profile: Vec<f64>,
    /// `(region, hit)` for the hits inside the inner window
    pub central_hits: Vec<(usize, MotifHit)>,
}

impl RegionScan {
    pub fn n_regions(&self) -> usize {
        self.presence.len()
    }

    pub fn n_present(&self) -> usize {
        self.presence.iter().filter(|p| **p).count()
    }

    /// Fraction of regions with the motif, 0 for an empty set
    pub fn support(&self) -> f64 {
        if self.presence.is_empty() {
            0.0
        } else {
            self.n_present() as f64 / self.n_regions() as f64
        }
    }

    /// Mean hit density inside the inner window over the mean outside it.
    ///
    /// Infinite when only the inner window has hits and NaN when neither has.
    pub fn central_enrichment(&self, window: &ScanWindow) -> f64 {
        let inner = window.internal_range();
        let end = inner.end.min(self.profile.len());
        let start = inner.start.min(end);

        let inner_values = &self.profile[start..end];
        let outer_values: Vec<f64> = self.profile[..start]
            .iter()
            .chain(&self.profile[end..])
            .copied()
            .collect();

        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let inner_mean = mean(inner_values);
        let outer_mean = mean(&outer_values);

        match (inner_mean > 0.0, outer_mean > 0.0) {
            (_, true) => inner_mean / outer_mean,
            (true, false) => f64::INFINITY,
            (false, false) => f64::NAN,
        }
    }
}

/// Scans every region sequence with one motif.
///
/// Sequences are expected to span `window.window_length` bases; windows
/// overlapping an `N` are skipped.
pub fn scan_region_set(
    motif: &MotifRecord,
    sequences: &[String],
    window: &ScanWindow,
    threshold: ScanThreshold,
) -> Result<RegionScan> {
    let inner = window.internal_range();
    let mut presence = vec![false; sequences.len()];
    let mut profile = vec![0.0; window.window_length];
    let mut central_hits = Vec::new();

    for (region, sequence) in sequences.iter().enumerate() {
        for hit in scan_skipping_n(&motif.pwm, sequence, threshold)? {
            let end = hit.end.min(profile.len());
            let start = hit.position.min(end);
            profile[start..end].iter_mut().for_each(|v| *v += 1.0);

            if hit.position >= inner.start && hit.end <= inner.end {
                presence[region] = true;
                central_hits.push((region, hit));
            }
        }
    }

    Ok(RegionScan {
        motif_id: motif.id.clone(),
        motif_name: motif.name.clone(),
        presence,
        profile,
        central_hits,
    })
}

/// Scans `sequences` with every motif on a pool of `n_workers` threads,
/// one job per motif.
///
/// All jobs run to completion before any failure is reported, so a failed
/// job never leaves a partial result behind.
///
/// # Errors
/// * `HaystackError::ResourceExhaustion` if the pool cannot be built
/// * `HaystackError::Worker` wrapping the first failed job, in motif order
pub fn scan_regions(
    motifs: &[MotifRecord],
    sequences: &[String],
    window: &ScanWindow,
    threshold: ScanThreshold,
    n_workers: usize,
) -> Result<Vec<RegionScan>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers)
        .build()
        .map_err(|e| {
            HaystackError::ResourceExhaustion(format!("Failed to build thread pool: {}", e))
        })?;

    info!(
        "Scanning {} regions with {} motifs on {} threads",
        sequences.len(),
        motifs.len(),
        pool.current_num_threads()
    );
    let results: Vec<Result<RegionScan>> = pool.install(|| {
        motifs
            .par_iter()
            .map(|motif| {
                scan_region_set(motif, sequences, window, threshold)
                    .map_err(|e| HaystackError::in_worker(&motif.id, e))
            })
            .collect()
    });

    results.into_iter().collect()
}

/// Two-sided Fisher exact test on `[[a, b], [c, d]]`.
///
/// Sums the probability of every table with the same margins that is no
/// more likely than the observed one.
///
/// # Errors
/// * `HaystackError::NumericDegeneracy` if a row of the table is empty
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64) -> Result<f64> {
    let row1 = a + b;
    let row2 = c + d;
    if row1 == 0 || row2 == 0 {
        return Err(HaystackError::degenerate(format!(
            "Fisher test on a table with an empty side: [[{}, {}], [{}, {}]]",
            a, b, c, d
        )));
    }
    let population = row1 + row2;
    let successes = a + c;
    if successes == 0 || successes == population {
        return Ok(1.0);
    }

    let dist = Hypergeometric::new(population, successes, row1)
        .map_err(|e| HaystackError::degenerate(e.to_string()))?;
    let observed = dist.pmf(a);
    let low = (row1 + successes).saturating_sub(population);
    let high = row1.min(successes);

    let p: f64 = (low..=high)
        .map(|k| dist.pmf(k))
        .filter(|pk| *pk <= observed * (1.0 + FISHER_RELATIVE_TOLERANCE))
        .sum();
    Ok(p.min(1.0))
}

/// Parameters of the enrichment test and report filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Target support under which a motif's ratio is forced to 1
    pub min_support: f64,
    /// Added to both supports before taking their ratio
    pub smoothing: f64,
    pub disable_ratio: bool,
    pub p_value_cutoff: f64,
    pub min_central_enrichment: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            min_support: 0.03,
            smoothing: 0.01,
            disable_ratio: false,
            p_value_cutoff: 0.01,
            min_central_enrichment: 1.0,
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_support) {
            return Err(HaystackError::invalid_parameter(
                "min_support",
                self.min_support,
                "must be in [0, 1]",
            ));
        }
        if !(self.smoothing.is_finite() && self.smoothing > 0.0) {
            return Err(HaystackError::invalid_parameter(
                "smoothing",
                self.smoothing,
                "must be positive",
            ));
        }
        if !(self.p_value_cutoff > 0.0 && self.p_value_cutoff <= 1.0) {
            return Err(HaystackError::invalid_parameter(
                "p_value_cutoff",
                self.p_value_cutoff,
                "must be in (0, 1]",
            ));
        }
        if self.min_central_enrichment.is_nan() {
            return Err(HaystackError::invalid_parameter(
                "min_central_enrichment",
                self.min_central_enrichment,
                "must be a number",
            ));
        }
        Ok(())
    }

    /// Whether a tested motif passes the report filter
    pub fn is_reported(&self, record: &EnrichmentRecord) -> bool {
        (record.support_target >= self.min_support || self.disable_ratio)
            && record.p_value < self.p_value_cutoff
            && (record.ratio > 1.0 || self.disable_ratio)
            && record.central_enrichment > self.min_central_enrichment
    }
}

/// Enrichment statistics of one motif.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub motif_id: String,
    pub motif_name: Option<String>,
    pub present_target: usize,
    pub present_bg: usize,
    pub support_target: f64,
    pub support_bg: f64,
    pub ratio: f64,
    pub p_value: f64,
    /// Only set for motifs kept by the ratio filter
    pub q_value: Option<f64>,
    /// 1-based rank by decreasing ratio
    pub rank: usize,
    pub central_enrichment: f64,
}

/// Tests every motif for enrichment in the target regions.
///
/// `target[i]` and `background[i]` must be scans of the same motif. Records
/// come back sorted by rank; ties in ratio keep the input order.
///
/// # Errors
/// * `HaystackError::InvalidInput` if the two scan lists do not pair up
/// * `HaystackError::NumericDegeneracy` if either region set is empty
pub fn test_enrichment(
    target: &[RegionScan],
    background: &[RegionScan],
    window: &ScanWindow,
    config: &EnrichmentConfig,
) -> Result<Vec<EnrichmentRecord>> {
    config.validate()?;
    if target.len() != background.len() {
        return Err(HaystackError::InvalidInput(format!(
            "{} target scans but {} background scans",
            target.len(),
            background.len()
        )));
    }

    let mut records = Vec::with_capacity(target.len());
    for (tg, bg) in target.iter().zip(background) {
        if tg.motif_id != bg.motif_id {
            return Err(HaystackError::InvalidInput(format!(
                "target scan of {} paired with background scan of {}",
                tg.motif_id, bg.motif_id
            )));
        }
        let n_tg = tg.n_regions() as u64;
        let n_bg = bg.n_regions() as u64;
        let p_tg = tg.n_present() as u64;
        let p_bg = bg.n_present() as u64;
        let p_value = fisher_exact(p_tg, n_tg - p_tg, p_bg, n_bg - p_bg)?;

        let support_target = tg.support();
        let support_bg = bg.support();
        let mut ratio = (support_target + config.smoothing) / (support_bg + config.smoothing);
        if !config.disable_ratio && support_target < config.min_support {
            ratio = 1.0;
        }

        records.push(EnrichmentRecord {
            motif_id: tg.motif_id.clone(),
            motif_name: tg.motif_name.clone(),
            present_target: tg.n_present(),
            present_bg: bg.n_present(),
            support_target,
            support_bg,
            ratio,
            p_value,
            q_value: None,
            rank: 0,
            central_enrichment: tg.central_enrichment(window),
        });
    }

    // stable sort keeps input order among equal ratios
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| records[b].ratio.total_cmp(&records[a].ratio));
    for (rank, &idx) in order.iter().enumerate() {
        records[idx].rank = rank + 1;
    }

    let kept: Vec<usize> = (0..records.len())
        .filter(|&i| config.disable_ratio || records[i].ratio > 1.0)
        .collect();
    let p_values: Vec<f64> = kept.iter().map(|&i| records[i].p_value).collect();
    let q_values = estimate_qvalues(&p_values, None)?;
    for (&i, q) in kept.iter().zip(q_values) {
        records[i].q_value = Some(q);
    }
    debug!(
        "{} of {} motifs kept by the ratio filter",
        kept.len(),
        records.len()
    );

    records.sort_by_key(|r| r.rank);
    Ok(records)
}

/// Records passing the report filter, in rank order
pub fn significant<'a>(
    records: &'a [EnrichmentRecord],
    config: &EnrichmentConfig,
) -> Vec<&'a EnrichmentRecord> {
    let selected: Vec<&EnrichmentRecord> =
        records.iter().filter(|r| config.is_reported(r)).collect();
    info!(
        "{} of {} motifs are significantly enriched",
        selected.len(),
        records.len()
    );
    selected
}

/// Enrichment records as a report table.
///
/// Supports are percentages, as in the HTML and text reports.
pub fn enrichment_table(records: &[&EnrichmentRecord]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Column::new(
            "motif_id".into(),
            records.iter().map(|r| r.motif_id.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "motif_name".into(),
            records
                .iter()
                .map(|r| r.motif_name.as_deref())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "rank".into(),
            records.iter().map(|r| r.rank as u64).collect::<Vec<_>>(),
        ),
        Column::new(
            "support_target".into(),
            records
                .iter()
                .map(|r| r.support_target * 100.0)
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "support_bg".into(),
            records
                .iter()
                .map(|r| r.support_bg * 100.0)
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "ratio".into(),
            records.iter().map(|r| r.ratio).collect::<Vec<_>>(),
        ),
        Column::new(
            "p_value".into(),
            records.iter().map(|r| r.p_value).collect::<Vec<_>>(),
        ),
        Column::new(
            "q_value".into(),
            records.iter().map(|r| r.q_value).collect::<Vec<_>>(),
        ),
        Column::new(
            "central_enrichment".into(),
            records
                .iter()
                .map(|r| r.central_enrichment)
                .collect::<Vec<_>>(),
        ),
    ])?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fisher_matches_reference_values() {
        // scipy.stats.fisher_exact([[8, 2], [1, 5]])
        let p = fisher_exact(8, 2, 1, 5).unwrap();
        assert!((p - 0.034965).abs() < 1e-5);
        assert!((fisher_exact(3, 3, 3, 3).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inner_window_is_centred() {
        let window = ScanWindow::new(1000, 200).unwrap();
        assert_eq!(window.internal_range(), 400..600);
    }

    #[test]
    fn odd_inner_window_is_rounded_up() {
        let window = ScanWindow::new(1000, 201).unwrap();
        assert_eq!(window.internal_range(), 399..601);
    }
}
