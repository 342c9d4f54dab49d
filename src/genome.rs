//! Genomic sequence access.

use crate::coordinate::Coordinate;
use crate::error::{HaystackError, Result};
use crate::fasta::read_fasta_records;
use log::info;
use std::collections::HashMap;
use std::path::Path;

/// Source of reference sequence for coordinates.
///
/// Returned sequences are lowercase over `{a, c, g, t, n}`.
pub trait SequenceProvider: Sync {
    fn extract_sequence(&self, coordinate: &Coordinate, mask_repetitive: bool) -> Result<String>;

    fn chromosome_length(&self, chrom: &str) -> Option<u64>;

    /// Chromosome names in a stable order
    fn chromosomes(&self) -> Vec<String>;
}

/// An in-memory genome loaded from a (multi-)FASTA file.
///
/// Lowercase (soft-masked) bases are considered repetitive.
#[derive(Debug, Clone, Default)]
pub struct FastaGenome {
    sequences: HashMap<String, Vec<u8>>,
    order: Vec<String>,
}

impl FastaGenome {
    pub fn from_fasta(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref();
        let records = read_fasta_records(filename)?;
        info!(
            "Loaded {} chromosomes from {}",
            records.len(),
            filename.display()
        );
        Ok(Self::from_records(records))
    }

    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut genome = FastaGenome::default();
        for (name, seq) in records {
            let name = name.into();
            genome.order.push(name.clone());
            genome.sequences.insert(name, seq.into().into_bytes());
        }
        genome
    }
}

impl SequenceProvider for FastaGenome {
    fn extract_sequence(&self, coordinate: &Coordinate, mask_repetitive: bool) -> Result<String> {
        let chrom = self.sequences.get(&coordinate.chrom).ok_or_else(|| {
            HaystackError::InvalidInput(format!("Unknown chromosome {}", coordinate.chrom))
        })?;
        if coordinate.end as usize > chrom.len() || coordinate.start > coordinate.end {
            return Err(HaystackError::InvalidInput(format!(
                "{} is outside {} (length {})",
                coordinate,
                coordinate.chrom,
                chrom.len()
            )));
        }

        let slice = &chrom[coordinate.start as usize..coordinate.end as usize];
        let seq = slice
            .iter()
            .map(|&b| match b {
                b'a' | b'c' | b'g' | b't' if mask_repetitive => 'n',
                b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't' => {
                    (b as char).to_ascii_lowercase()
                }
                _ => 'n',
            })
            .collect();
        Ok(seq)
    }

    fn chromosome_length(&self, chrom: &str) -> Option<u64> {
        self.sequences.get(chrom).map(|s| s.len() as u64)
    }

    fn chromosomes(&self) -> Vec<String> {
        self.order.clone()
    }
}
