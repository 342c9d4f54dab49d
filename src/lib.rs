//! Variability hotspots across epigenomic signal tracks and PWM motif
//! enrichment in Rust

pub mod background;
pub mod coordinate;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod fasta;
pub mod genome;
pub mod hotspots;
pub mod inflection;
pub mod meme;
pub mod motifs;
pub mod normalize;
pub mod pwm;
pub mod qvalue;
pub mod scan;
pub mod signal;
pub mod specificity;
pub mod tools;
pub mod types;
