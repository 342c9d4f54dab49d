use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nucleotide order used by every matrix in the crate: A, C, G, T
pub const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];

/// Column index of each scorable nucleotide
pub static BASE_INDEX: phf::Map<char, usize> = phf_map! {
    'A' => 0,
    'C' => 1,
    'G' => 2,
    'T' => 3,
};

/// Watson-Crick complement, N maps to itself
pub static COMPLEMENT: phf::Map<char, char> = phf_map! {
    'A' => 'T',
    'C' => 'G',
    'G' => 'C',
    'T' => 'A',
    'N' => 'N',
    'a' => 't',
    'c' => 'g',
    'g' => 'c',
    't' => 'a',
    'n' => 'n',
};

/// Two-letter IUPAC ambiguity codes, keyed by the sorted letter pair.
/// Used for consensus rendering only.
pub static TWO_TO_ONE: phf::Map<&'static str, char> = phf_map! {
    "AT" => 'W',
    "AC" => 'M',
    "AG" => 'R',
    "CG" => 'S',
    "CT" => 'Y',
    "GT" => 'K',
};

/// Index of a nucleotide in [`ALPHABET`], case-insensitive
pub fn base_index(base: char) -> Option<usize> {
    BASE_INDEX.get(&base.to_ascii_uppercase()).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

/// A window of a scanned sequence that scored above the threshold.
///
/// `position` is the 0-based start of the window and `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifHit {
    pub position: usize,
    pub end: usize,
    pub text: String,
    pub score: f64,
    pub strand: Strand,
}
