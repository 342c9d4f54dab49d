use assert_approx_eq::assert_approx_eq;
use haystack_rs::background::{
    downsample, gc_bin, gc_bin_edges, random_gc_matched_background, region_gc_content,
    sample_gc_matched_background,
};
use haystack_rs::coordinate::Coordinate;
use haystack_rs::enrichment::{
    enrichment_table, fisher_exact, significant, test_enrichment, EnrichmentConfig, RegionScan,
    ScanWindow,
};
use haystack_rs::error::HaystackError;
use haystack_rs::fasta::gc_fraction;
use haystack_rs::genome::FastaGenome;
use haystack_rs::meme::parse_meme;
use haystack_rs::motifs::{build_background, motif_enrichment, window_sequences, MotifRunConfig};
use haystack_rs::pwm::{Background, MotifRecord, Pwm, LOG_ODDS_FLOOR};
use haystack_rs::qvalue::{estimate_pi0, estimate_qvalues};
use haystack_rs::scan::{best_match, mask, scan, scan_sum, ScanThreshold};
use haystack_rs::types::Strand;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;
use std::io::Cursor;

const PLANTED: &str = "TGGATTACAGGTCA";

fn acgt_pwm() -> Pwm {
    Pwm::from_alignment(&["ACGT", "ACGT", "ACGT", "ACGT"], Background::uniform(), 0.0).unwrap()
}

#[test]
fn test_pwm_from_identical_sites_is_certain() {
    let pwm = acgt_pwm();
    assert_eq!(pwm.width(), 4);
    assert_eq!(pwm.consensus(), "ACGT");

    let p = pwm.probabilities();
    for (pos, letter) in [0, 1, 2, 3].into_iter().enumerate() {
        for j in 0..4 {
            let expected = if j == letter { 1.0 } else { 0.0 };
            assert_eq!(p[[pos, j]], expected);
        }
    }
    assert!(pwm.entropy().iter().all(|h| h.abs() < 1e-12));
    assert_approx_eq!(pwm.total_bits(), 8.0, 1e-12);
    assert_approx_eq!(pwm.max_score(), 8.0, 1e-12);
    assert_eq!(pwm.score_at(0, 2), LOG_ODDS_FLOOR);
}

#[test]
fn test_min_score_and_background_swap() {
    let pwm = acgt_pwm();
    assert_eq!(pwm.min_score(), 4.0 * LOG_ODDS_FLOOR);

    let skewed = Background::new([0.4, 0.1, 0.1, 0.4]).unwrap();
    let rederived = pwm.with_background(skewed).unwrap();
    assert_eq!(rederived.counts(), pwm.counts());
    assert_eq!(rederived.background(), &skewed);
    assert_approx_eq!(rederived.score_at(0, 0), 2.5f64.log2(), 1e-12);
    assert_approx_eq!(rederived.score_at(1, 1), 10.0f64.log2(), 1e-12);
    assert_approx_eq!(rederived.max_score(), 2.0 * 25.0f64.log2(), 1e-12);
}

#[rstest]
#[case(&["AA", "GA"], "RA")]
#[case(&["AC", "CC", "GC", "TC"], ".C")]
#[case(&["AA", "AA", "CA", "GA"], "aA")]
fn test_consensus_letters(#[case] sites: &[&str], #[case] expected: &str) {
    let pwm = Pwm::from_alignment(sites, Background::uniform(), 0.0).unwrap();
    assert_eq!(pwm.consensus(), expected);
    assert_eq!(pwm.to_string(), expected);
}

#[test]
fn test_pwm_rejects_bad_alignments() {
    assert!(matches!(
        Pwm::from_alignment(&["ACG", "AC"], Background::uniform(), 0.0),
        Err(HaystackError::InvalidInput(_))
    ));
    assert!(matches!(
        Pwm::from_alignment(&["ACXG"], Background::uniform(), 0.0),
        Err(HaystackError::InvalidSequence { position: 2, .. })
    ));
    assert!(matches!(
        Pwm::from_alignment(&["NN", "NN"], Background::uniform(), 0.0),
        Err(HaystackError::InvalidPwm(_))
    ));
}

#[test]
fn test_pseudocounts_keep_probabilities_normalized() {
    let background = Background::new([0.3, 0.2, 0.2, 0.3]).unwrap();
    let pwm = Pwm::from_alignment(&["ACGT", "ACGA", "TCGA"], background, 0.01).unwrap();
    for row in pwm.probabilities().rows() {
        assert_approx_eq!(row.sum(), 1.0, 1e-12);
        assert!(row.iter().all(|p| *p > 0.0));
    }
    assert!(pwm.log_odds().iter().all(|ll| *ll > LOG_ODDS_FLOOR));
}

#[test]
fn test_background_must_be_a_distribution() {
    assert!(Background::new([0.5, 0.5, 0.5, 0.5]).is_err());
    assert!(Background::new([1.0, 0.0, 0.0, 0.0]).is_err());
    let bg = Background::normalized([2.0, 2.0, 2.0, 2.0]).unwrap();
    assert_eq!(bg, Background::uniform());
    assert_approx_eq!(bg.entropy(), 2.0, 1e-12);
}

#[test]
fn test_reverse_complement_is_an_involution() {
    let pwm = Pwm::from_alignment(&["AACG", "ATCG", "GACG"], Background::uniform(), 0.01).unwrap();
    let rc = pwm.reverse_complement().unwrap();
    assert_ne!(rc, pwm);
    assert_eq!(rc.reverse_complement().unwrap(), pwm);
    // last position, G, becomes C at the front
    assert_eq!(rc.score_at(0, 1), pwm.score_at(3, 2));
}

#[test]
fn test_reverse_complement_scores_against_the_background() {
    let background = Background::new([0.4, 0.2, 0.2, 0.2]).unwrap();
    let pwm = Pwm::from_alignment(&["TC", "TC", "GC"], background, 0.01).unwrap();
    let rc = pwm.reverse_complement().unwrap();

    assert_eq!(rc.counts()[[1, 0]], pwm.counts()[[0, 3]]);
    assert_eq!(rc, rc.with_background(*rc.background()).unwrap());

    // T (2 of 3) becomes A and is scored against the A frequency
    let p_a: f64 = (2.0 + 0.01 * 0.4 * 3.0) / 1.01 / 3.0;
    assert_approx_eq!(rc.score_at(1, 0), (p_a / 0.4).log2(), 1e-12);
    assert_approx_eq!(rc.probabilities()[[1, 0]], p_a, 1e-12);
}

#[test]
fn test_sub_matrix_bounds() {
    let pwm = acgt_pwm();
    let sub = pwm.sub_matrix(1, 2).unwrap();
    assert_eq!(sub.consensus(), "CG");
    assert!(pwm.sub_matrix(3, 2).is_err());
    assert!(pwm.sub_matrix(0, 0).is_err());
}

#[test]
fn test_scan_finds_the_single_site() {
    let pwm = acgt_pwm();
    let hits = scan(&pwm, "AAACGTAAA", ScanThreshold::Absolute(0.0)).unwrap();
    assert_eq!(hits.len(), 1);
    // 0-based: the site spans bases 3 to 6 counted from one
    assert_eq!(hits[0].position, 2);
    assert_eq!(hits[0].end, 6);
    assert_eq!(hits[0].text, "ACGT");
    assert_eq!(hits[0].strand, Strand::Forward);
    assert_approx_eq!(hits[0].score, 8.0, 1e-12);
}

#[test]
fn test_scan_reports_reverse_strand_sites() {
    let pwm = Pwm::from_alignment(&["AACC"], Background::uniform(), 0.0).unwrap();
    let hits = scan(&pwm, "ttggtt", ScanThreshold::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].position, 2);
    assert_eq!(hits[0].text, "ggtt");
    assert_eq!(hits[0].strand, Strand::Reverse);
}

#[test]
fn test_planted_site_is_the_best_match() {
    let pwm = Pwm::from_alignment(&[PLANTED], Background::uniform(), 0.01).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut sequence = random_dna(&mut rng, 60);
    sequence.replace_range(20..20 + PLANTED.len(), PLANTED);

    let best = best_match(&pwm, &sequence).unwrap().unwrap();
    assert_eq!(best.position, 20);
    assert_approx_eq!(best.score, pwm.max_score(), 1e-9);

    let summary = scan_sum(&pwm, &sequence, pwm.max_score() - 1e-9).unwrap();
    assert_eq!(summary.hits, 1);
    assert_approx_eq!(summary.total, pwm.max_score(), 1e-9);
    assert_approx_eq!(summary.log_sum_exp, pwm.max_score(), 1e-9);
}

#[test]
fn test_mask_replaces_sites_and_keeps_length() {
    let pwm = acgt_pwm();
    let masked = mask(&pwm, "AAACGTAAACGT", ScanThreshold::Absolute(0.0)).unwrap();
    assert_eq!(masked, "AANNNNAANNNN");
    assert_eq!(masked.len(), 12);
}

const MEME: &str = "MEME version 4

ALPHABET= ACGT

strands: + -

Background letter frequencies
A 0.3 C 0.2 G 0.2 T 0.3

MOTIF MA0001.1 AGL3
letter-probability matrix: alength= 4 w= 3 nsites= 20 E= 0
  1.000000  0.000000  0.000000  0.000000
  0.000000  1.000000  0.000000  0.000000

  0.250000  0.250000  0.250000  0.250000
URL http://jaspar.genereg.net/matrix/MA0001.1

MOTIF M2
letter-probability matrix: alength= 4 w= 2
0.5 0.5 0 0
0 0 0.5 0.5
";

#[test]
fn test_parse_meme_motifs() {
    let motifs = parse_meme(Cursor::new(MEME), None, 0.0).unwrap();
    assert_eq!(motifs.len(), 2);

    assert_eq!(motifs[0].id, "MA0001.1");
    assert_eq!(motifs[0].name.as_deref(), Some("AGL3"));
    assert_eq!(motifs[0].label(), "MA0001.1 AGL3");
    assert_eq!(motifs[0].pwm.width(), 3);
    assert_approx_eq!(motifs[0].pwm.background().get(0), 0.3, 1e-12);
    assert_eq!(motifs[0].pwm.consensus(), "AC.");

    assert_eq!(motifs[1].id, "M2");
    assert_eq!(motifs[1].name, None);
    assert_eq!(motifs[1].pwm.width(), 2);
}

#[test]
fn test_explicit_background_overrides_the_file() {
    let motifs = parse_meme(Cursor::new(MEME), Some(Background::uniform()), 0.0).unwrap();
    assert_eq!(*motifs[1].pwm.background(), Background::uniform());
}

#[rstest]
#[case("MEME version 4\n\nALPHABET= ACGT\n")]
#[case("MOTIF short\nletter-probability matrix: w= 3\n0.25 0.25 0.25 0.25\n")]
#[case("MOTIF wide\nletter-probability matrix: w= 1\n0.2 0.2 0.2 0.2 0.2\n")]
#[case("MOTIF nomatrix\n\nMOTIF other\n")]
fn test_malformed_meme_is_rejected(#[case] text: &str) {
    assert!(matches!(
        parse_meme(Cursor::new(text), None, 0.01),
        Err(HaystackError::InvalidFileFormat(_))
    ));
}

#[test]
fn test_qvalues_are_monotone_in_p() {
    let p = [0.01, 0.04, 0.03, 0.2];
    let q = estimate_qvalues(&p, Some(1.0)).unwrap();
    let expected = [0.04, 0.16 / 3.0, 0.16 / 3.0, 0.2];
    for (a, b) in q.iter().zip(expected) {
        assert_approx_eq!(a, b, 1e-12);
    }

    let mut rng = StdRng::seed_from_u64(5);
    let p: Vec<f64> = (0..500).map(|_| rng.gen::<f64>().powi(3)).collect();
    let q = estimate_qvalues(&p, None).unwrap();
    let mut order: Vec<usize> = (0..p.len()).collect();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));
    for pair in order.windows(2) {
        assert!(q[pair[0]] <= q[pair[1]] + 1e-15);
    }
    assert!(q.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_pi0_needs_enough_tests() {
    assert_eq!(estimate_pi0(&[0.001; 50]).unwrap(), 1.0);
    // a quarter of the tests are null
    let mut p = vec![0.001; 150];
    p.extend((0..50).map(|i| (i as f64 + 0.5) / 50.0));
    let pi0 = estimate_pi0(&p).unwrap();
    assert!(pi0 > 0.15 && pi0 < 0.4, "pi0 = {}", pi0);
}

#[test]
fn test_qvalue_input_checks() {
    assert!(estimate_qvalues(&[0.5, 1.5], None).is_err());
    assert!(estimate_qvalues(&[0.5], Some(2.0)).is_err());
    assert!(estimate_qvalues(&[], None).unwrap().is_empty());
}

#[rstest]
#[case(8, 2, 1, 5, 0.034965)]
#[case(3, 3, 3, 3, 1.0)]
#[case(10, 0, 0, 10, 2.0 / 184756.0)]
fn test_fisher_exact(#[case] a: u64, #[case] b: u64, #[case] c: u64, #[case] d: u64, #[case] expected: f64) {
    assert_approx_eq!(fisher_exact(a, b, c, d).unwrap(), expected, 1e-6);
}

fn region_scan(id: &str, presence: Vec<bool>, window: &ScanWindow) -> RegionScan {
    let mut profile = vec![0.0; window.window_length];
    let inner = window.internal_range();
    for v in &mut profile[inner] {
        *v = presence.iter().filter(|p| **p).count() as f64;
    }
    RegionScan {
        motif_id: id.to_string(),
        motif_name: None,
        presence,
        profile,
        central_hits: Vec::new(),
    }
}

#[test]
fn test_motif_present_only_in_targets_is_significant() {
    let window = ScanWindow::new(500, 100).unwrap();
    let n = 12;
    let target = vec![
        region_scan("always", vec![true; n], &window),
        region_scan("half", (0..n).map(|i| i % 2 == 0).collect(), &window),
        region_scan("never", vec![false; n], &window),
    ];
    let background = vec![
        region_scan("always", vec![false; n], &window),
        region_scan("half", (0..n).map(|i| i % 2 == 0).collect(), &window),
        region_scan("never", vec![false; n], &window),
    ];
    let config = EnrichmentConfig::default();
    let records = test_enrichment(&target, &background, &window, &config).unwrap();

    assert_eq!(records[0].motif_id, "always");
    assert_eq!(records[0].rank, 1);
    assert!(records[0].p_value < 0.01);
    assert_approx_eq!(records[0].ratio, 1.01 / 0.01, 1e-9);
    let q = records[0].q_value.unwrap();
    assert!(q <= records[0].p_value + 1e-15);

    // equal supports give a ratio of exactly 1, which is not tested further
    let half = records.iter().find(|r| r.motif_id == "half").unwrap();
    assert_approx_eq!(half.ratio, 1.0, 1e-12);
    assert_eq!(half.q_value, None);
    assert_approx_eq!(half.p_value, 1.0, 1e-9);

    let never = records.iter().find(|r| r.motif_id == "never").unwrap();
    assert!(never.central_enrichment.is_nan());

    let reported = significant(&records, &config);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].motif_id, "always");

    let table = enrichment_table(&reported).unwrap();
    assert_eq!(table.height(), 1);
    let support = table.column("support_target").unwrap().f64().unwrap().get(0);
    assert_eq!(support, Some(100.0));
}

#[test]
fn test_enrichment_needs_paired_scans() {
    let window = ScanWindow::new(100, 20).unwrap();
    let target = vec![region_scan("a", vec![true; 3], &window)];
    let background = vec![region_scan("b", vec![true; 3], &window)];
    assert!(matches!(
        test_enrichment(&target, &background, &window, &EnrichmentConfig::default()),
        Err(HaystackError::InvalidInput(_))
    ));
}

#[test]
fn test_scan_window_bounds() {
    assert!(ScanWindow::new(100, 0).is_err());
    assert!(ScanWindow::new(100, 200).is_err());
    assert_eq!(ScanWindow::new(1000, 200).unwrap().internal_range(), 400..600);
    // odd inner windows gain a base rather than lose one
    assert_eq!(ScanWindow::new(100, 21).unwrap().internal_range(), 39..61);
    assert_eq!(ScanWindow::new(21, 21).unwrap().internal_range(), 0..21);
}

#[test]
fn test_gc_matched_sampling_follows_the_target_histogram() {
    let target_gc = vec![0.5; 10];
    let mut candidate_gc = vec![0.5; 30];
    candidate_gc.extend(vec![0.95; 10]);

    let picked = sample_gc_matched_background(&target_gc, &candidate_gc, 2.0, 8, 1).unwrap();
    assert_eq!(picked.len(), 20);
    assert!(picked.iter().all(|&i| i < 30));
    assert!(picked.windows(2).all(|w| w[0] < w[1]));

    // fewer candidates than wanted lowers the ratio
    let picked = sample_gc_matched_background(&target_gc, &candidate_gc[..15], 2.0, 8, 1).unwrap();
    assert_eq!(picked.len(), 15);

    assert!(matches!(
        sample_gc_matched_background(&target_gc, &[0.95; 10], 2.0, 8, 1),
        Err(HaystackError::NumericDegeneracy(_))
    ));
}

#[test]
fn test_gc_bins_include_the_upper_edge() {
    let edges = gc_bin_edges(5).unwrap();
    assert_eq!(gc_bin(0.0, &edges), Some(0));
    assert_eq!(gc_bin(1.0, &edges), Some(4));
}

#[test]
fn test_downsample_keeps_order() {
    let regions: Vec<Coordinate> = (0..10u64)
        .map(|i| Coordinate::new("chr1", i * 10, i * 10 + 5))
        .collect();
    let kept = downsample(&regions, 4, 9);
    assert_eq!(kept.len(), 4);
    assert!(kept.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(kept, downsample(&regions, 4, 9));
    assert_eq!(downsample(&regions, 20, 9).len(), 10);
}

fn random_dna(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| ['A', 'C', 'G', 'T'][rng.gen_range(0..4)])
        .collect()
}

/// A random chromosome with `PLANTED` at the centre of 20 target regions,
/// followed by 40 plain background regions
fn planted_genome() -> (FastaGenome, Vec<Coordinate>, Vec<Coordinate>) {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut chrom = random_dna(&mut rng, 30_000);
    let mut targets = Vec::new();
    for i in 0..20 {
        let center = 1000 + i * 1000;
        chrom.replace_range(center - 7..center + 7, PLANTED);
        targets.push(Coordinate::new("chr1", center as u64 - 50, center as u64 + 50));
    }
    let candidates = (0..40u64)
        .map(|i| {
            let center = 22_500 + i * 180;
            Coordinate::new("chr1", center - 50, center + 50)
        })
        .collect();
    (
        FastaGenome::from_records(vec![("chr1".to_string(), chrom)]),
        targets,
        candidates,
    )
}

#[test]
fn test_motif_enrichment_on_planted_sites() {
    let (genome, targets, candidates) = planted_genome();
    let motifs = vec![
        MotifRecord {
            id: "planted".into(),
            name: Some("GATTACA".into()),
            pwm: Pwm::from_alignment(&[PLANTED], Background::uniform(), 0.01).unwrap(),
        },
        MotifRecord {
            id: "absent".into(),
            name: None,
            pwm: Pwm::from_alignment(&["CCCCCCCCCCCC"], Background::uniform(), 0.01).unwrap(),
        },
    ];

    let mut config = MotifRunConfig::new(ScanWindow::new(500, 100).unwrap());
    config.c_g_correction = false;
    config.n_workers = 2;

    let background = build_background(&targets, Some(&candidates), &genome, &config).unwrap();
    assert_eq!(background.len(), 40);

    let result = motif_enrichment(&motifs, &targets, &background, &genome, &config).unwrap();
    assert_eq!(result.target_regions.len(), 20);
    assert_eq!(result.background_regions.len(), 40);

    let frame = result.target_frame().unwrap();
    assert_eq!(frame.height(), 20);
    let labels = frame.column("label").unwrap().str().unwrap();
    assert_eq!(labels.get(0), Some(targets[0].to_string().as_str()));
    let sequences = frame.column("sequence").unwrap().str().unwrap();
    assert_eq!(sequences.get(0).map(str::len), Some(500));
    let gc = frame.column("gc_content").unwrap().f64().unwrap();
    assert_eq!(gc.get(0), Some(gc_fraction(&result.target_sequences[0])));
    assert_eq!(result.background_frame().unwrap().height(), 40);
    assert_eq!(result.target_scans.len(), 2);
    assert_eq!(result.target_scans[0].n_present(), 20);
    assert_eq!(result.background_scans[0].n_present(), 0);

    let planted = &result.records[0];
    assert_eq!(planted.motif_id, "planted");
    assert!(planted.p_value < 1e-6);
    assert!(planted.central_enrichment > 1.0);
    assert_eq!(planted.q_value, Some(planted.p_value));

    let reported = significant(&result.records, &config.enrichment);
    assert_eq!(reported.len(), 1);

    // hits sit at the centre of the 500bp window around each target
    for (region, hit) in &result.target_scans[0].central_hits {
        let start = result.target_regions[*region].center() - 250;
        assert_eq!(start + hit.position as u64, targets[*region].center() - 7);
    }
}

#[test]
fn test_window_sequences_skip_chromosome_ends() {
    let (genome, _, _) = planted_genome();
    let regions = vec![
        Coordinate::new("chr1", 50, 150),
        Coordinate::new("chr1", 5000, 5100),
        Coordinate::new("chr1", 29_900, 30_000),
    ];
    let (kept, sequences) = window_sequences(&regions, &genome, 500, false).unwrap();
    assert_eq!(kept, vec![Coordinate::new("chr1", 5000, 5100)]);
    assert_eq!(sequences[0].len(), 500);

    let unknown = vec![Coordinate::new("chrX", 0, 10)];
    assert!(window_sequences(&unknown, &genome, 5, false).is_err());
}

#[test]
fn test_random_gc_matched_background_follows_targets() {
    let (genome, targets, _) = planted_genome();
    let edges = gc_bin_edges(8).unwrap();
    let background = random_gc_matched_background(&targets, &genome, 2, 8, 1000, 3).unwrap();
    assert!(!background.is_empty());
    assert!(background.len() <= 40);
    assert!(background.iter().all(|c| c.chrom == "chr1" && c.len() == 100));

    let target_bins: Vec<_> = region_gc_content(&targets, &genome)
        .unwrap()
        .into_iter()
        .map(|gc| gc_bin(gc, &edges))
        .collect();
    for gc in region_gc_content(&background, &genome).unwrap() {
        assert!(target_bins.contains(&gc_bin(gc, &edges)));
    }
}

#[test]
fn test_motif_run_config_validation() {
    let mut config = MotifRunConfig::new(ScanWindow::new(500, 100).unwrap());
    assert!(config.validate().is_ok());
    config.n_workers = 0;
    assert!(config.validate().is_err());

    let mut config = MotifRunConfig::new(ScanWindow::new(500, 100).unwrap());
    config.c_g_bins = 1;
    assert!(config.validate().is_err());

    let json = serde_json::to_value(MotifRunConfig::new(ScanWindow::new(500, 100).unwrap())).unwrap();
    assert_eq!(json["window_length"], 500);
    assert_eq!(json["min_central_enrichment"], 1.0);
}
