use haystack_rs::coordinate::{merge_coordinates, read_bed, write_bed, Coordinate};
use haystack_rs::error::HaystackError;
use haystack_rs::fasta;
use haystack_rs::genome::{FastaGenome, SequenceProvider};
use polars::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_read_fasta() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test1.fasta");
    fs::write(
        &path,
        ">chr1-4357766-4357930_CPPP_WT extra words\nAGCTTTTTAATAGAG\ntcagcaaaac\n>seq2\nTGCTTTTT\n\n>seq3\nCGCT\n",
    )
    .unwrap();

    let records = fasta::read_fasta_records(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].0, "chr1-4357766-4357930_CPPP_WT");
    // soft-masked bases keep their case
    assert_eq!(records[0].1, "AGCTTTTTAATAGAGtcagcaaaac");
    assert_eq!(records[2], ("seq3".to_string(), "CGCT".to_string()));

    // test file does not exist
    let result = fasta::read_fasta_records(dir.path().join("nonexistent.fasta"));
    assert!(matches!(result, Err(HaystackError::Io(_))));
}

#[test]
fn test_write_fasta() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test1_out.fasta");
    let df: DataFrame = df!(
        "label" => ["chr1-4357766-4357930_CPPP_WT", "chr1-4357733-4357765_CPPP_WT", "chr1-4357712-4357732_CPPP_WT"],
        "sequence" => ["AGCTTTTTAATAGAGTCAGCAAAACTGAAGCCT", "TGCTTTTTTTTTGAGTCAGCAAAACTGAAGCCT", "CGCTTTTTAATAGAGTCAGCAAAACTGAAGCCT"],
    )
    .unwrap();

    fasta::write_fasta(&df, &path).unwrap();

    let records = fasta::read_fasta_records(&path).unwrap();
    assert_eq!(records.len(), 3);
    let labels = df.column("label").unwrap().str().unwrap();
    let sequences = df.column("sequence").unwrap().str().unwrap();
    for (i, (label, sequence)) in records.iter().enumerate() {
        assert_eq!(labels.get(i), Some(label.as_str()));
        assert_eq!(sequences.get(i), Some(sequence.as_str()));
    }
}

#[test]
fn test_sequence_before_header_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.fasta");
    fs::write(&path, "ACGT\n>seq\nACGT\n").unwrap();
    assert!(matches!(
        fasta::read_fasta_records(&path),
        Err(HaystackError::InvalidFileFormat(_))
    ));
}

#[test]
fn test_reverse_complement() {
    assert_eq!(fasta::reverse_complement("ACGTN").unwrap(), "NACGT");
    assert_eq!(fasta::reverse_complement("aacg").unwrap(), "cgtt");
    assert!(matches!(
        fasta::reverse_complement("ACXT"),
        Err(HaystackError::InvalidSequence { .. })
    ));
}

#[test]
fn test_gc_content() {
    let df: DataFrame = df!(
        "label" => ["a", "b", "c"],
        "sequence" => ["GGCC", "ATGC", "ATAT"],
    )
    .unwrap();
    let gc = fasta::gc_content(&df).unwrap();
    let values: Vec<Option<f64>> = gc.column("gc_content").unwrap().f64().unwrap().into_iter().collect();
    assert_eq!(values, vec![Some(1.0), Some(0.5), Some(0.0)]);
    assert_eq!(fasta::gc_fraction(""), 0.0);
}

#[test]
fn test_genome_extraction_and_masking() {
    let genome = FastaGenome::from_records(vec![("chr1", "ACGTacgtNNAC"), ("chr2", "GGGG")]);
    assert_eq!(genome.chromosomes(), vec!["chr1".to_string(), "chr2".to_string()]);
    assert_eq!(genome.chromosome_length("chr1"), Some(12));
    assert_eq!(genome.chromosome_length("chrX"), None);

    let region = Coordinate::new("chr1", 2, 10);
    assert_eq!(genome.extract_sequence(&region, false).unwrap(), "gtacgtnn");
    assert_eq!(genome.extract_sequence(&region, true).unwrap(), "gtnnnnnn");

    let outside = Coordinate::new("chr2", 2, 6);
    assert!(genome.extract_sequence(&outside, false).is_err());
}

#[test]
fn test_merge_coordinates_joins_overlapping_and_book_ended() {
    let coords = vec![
        Coordinate::new("chr2", 0, 10),
        Coordinate::new("chr1", 20, 30),
        Coordinate::new("chr1", 0, 10),
        Coordinate::new("chr1", 10, 15),
        Coordinate::new("chr1", 12, 18),
    ];
    let merged = merge_coordinates(&coords);
    assert_eq!(
        merged,
        vec![
            Coordinate::new("chr1", 0, 18),
            Coordinate::new("chr1", 20, 30),
            Coordinate::new("chr2", 0, 10),
        ]
    );
}

#[test]
fn test_bed_round_trip_keeps_names() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("regions.bed");
    let coords = vec![
        Coordinate::new("chr1", 100, 200).with_name("peak1").with_score(3.5),
        Coordinate::new("chr1", 300, 450).with_name("peak2").with_score(1.0),
    ];
    write_bed(&coords, &path, false).unwrap();

    let read = read_bed(&path).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].start, 100);
    assert_eq!(read[1].end, 450);
    assert_eq!(read[0].name.as_deref(), Some("peak1"));
    assert_eq!(read[0].score, Some(3.5));
}

#[test]
fn test_derived_coordinates() {
    let peak = Coordinate::new("chr1", 100, 200).with_name("peak");
    assert_eq!(peak.center(), 150);

    let window = peak.around_center(51);
    assert_eq!((window.start, window.end), (124, 176));
    assert_eq!(window.name.as_deref(), Some("peak"));

    assert_eq!(peak.upstream(150), Coordinate::new("chr1", 0, 100));
    assert_eq!(peak.upstream(30), Coordinate::new("chr1", 70, 100));
    assert_eq!(peak.downstream(10), Coordinate::new("chr1", 200, 210));
    // the original is left untouched
    assert_eq!((peak.start, peak.end), (100, 200));

    assert_eq!(
        peak.intersection(&Coordinate::new("chr1", 150, 300)),
        Some(Coordinate::new("chr1", 150, 200))
    );
    assert_eq!(peak.intersection(&Coordinate::new("chr1", 200, 300)), None);
    assert_eq!(peak.intersection(&Coordinate::new("chr2", 100, 200)), None);
}

#[test]
fn test_coordinates_sort_by_numeric_chromosome() {
    let mut coords = vec![
        Coordinate::new("chrX", 0, 10),
        Coordinate::new("chr10", 5, 10),
        Coordinate::new("chr2", 50, 60),
        Coordinate::new("chr2", 10, 20),
    ];
    coords.sort();
    let order: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
    assert_eq!(
        order,
        vec!["chr2:10-20", "chr2:50-60", "chr10:5-10", "chrX:0-10"]
    );
}
