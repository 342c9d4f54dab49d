use crate::error::{HaystackError, Result};
use crate::types::COMPLEMENT;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Reads the raw `(header, sequence)` records of a FASTA file.
///
/// The header is the text after `>` up to the first whitespace. Sequence
/// case is preserved, so soft-masked (lowercase) bases survive.
pub fn read_fasta_records(filename: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);

    let mut records: Vec<(String, String)> = Vec::new();
    let mut current_header: Option<String> = None;
    let mut current_sequence = String::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        if let Some(header) = line.strip_prefix('>') {
            if let Some(previous) = current_header.take() {
                records.push((previous, std::mem::take(&mut current_sequence)));
            }
            let id = header.split_whitespace().next().unwrap_or_default();
            current_header = Some(id.to_string());
        } else if !line.is_empty() {
            if current_header.is_none() {
                return Err(HaystackError::InvalidFileFormat(
                    "Sequence data before the first FASTA header".into(),
                ));
            }
            current_sequence.push_str(line);
        }
    }

    if let Some(previous) = current_header {
        records.push((previous, current_sequence));
    }

    if records.is_empty() {
        return Err(HaystackError::InvalidFileFormat("No sequences found".into()));
    }

    Ok(records)
}

/// Writes sequences from a Polars DataFrame to a FASTA format file.
///
/// # Arguments
/// * `df` - DataFrame containing sequences with "label" and "sequence" columns
/// * `filename` - Path where the FASTA file should be written
///
/// # Errors
/// * Returns `HaystackError::Polars` if required columns are missing
/// * Returns `HaystackError::InvalidInput` if a label or sequence is null
/// * Returns `HaystackError::Io` for file writing issues
pub fn write_fasta(df: &DataFrame, filename: impl AsRef<Path>) -> Result<()> {
    let labels = df.column("label")?.str()?;
    let sequences = df.column("sequence")?.str()?;

    let records = labels.into_iter().zip(sequences).map(|(label, seq)| {
        label
            .zip(seq)
            .ok_or_else(|| HaystackError::InvalidInput("Null label or sequence".into()))
    });
    write_fasta_records(records, filename)
}

/// Writes `(label, sequence)` pairs to a FASTA file, one sequence line per record.
pub fn write_fasta_records<'a, I>(records: I, filename: impl AsRef<Path>) -> Result<()>
where
    I: IntoIterator<Item = Result<(&'a str, &'a str)>>,
{
    let mut file = BufWriter::new(File::create(filename)?);

    for record in records {
        let (label, sequence) = record?;
        writeln!(file, ">{}", label)?;
        writeln!(file, "{}", sequence)?;
    }

    file.flush()?;
    Ok(())
}

/// Generates the reverse complement of a DNA sequence.
///
/// Case is preserved and `N` complements to itself.
///
/// # Errors
/// * Returns `HaystackError::InvalidSequence` for any symbol other than A, C, G, T or N
pub fn reverse_complement(sequence: &str) -> Result<String> {
    sequence
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            COMPLEMENT.get(&c).copied().ok_or_else(|| {
                HaystackError::invalid_sequence(
                    sequence.len() - 1 - i,
                    format!("cannot complement '{}'", c),
                )
            })
        })
        .collect()
}

/// Fraction of G and C bases in a sequence, case-insensitive.
///
/// The denominator is the full sequence length, `N` included; an empty
/// sequence has a GC content of 0.
pub fn gc_fraction(sequence: &str) -> f64 {
    if sequence.is_empty() {
        return 0.0;
    }
    let gc_count = sequence
        .bytes()
        .filter(|b| matches!(b, b'G' | b'C' | b'g' | b'c'))
        .count() as f64;
    gc_count / sequence.len() as f64
}

/// Calculates the GC content for each sequence in the input DataFrame.
///
/// # Arguments
/// * `df` - DataFrame containing sequences with "label" and "sequence" columns
///
/// # Returns
/// * `Result<DataFrame>` - A DataFrame with:
///   - Original labels
///   - "gc_content": Fraction of G and C bases in each sequence
///
/// # Errors
/// * Returns `HaystackError::Polars` if required columns are missing or DataFrame creation fails
pub fn gc_content(df: &DataFrame) -> Result<DataFrame> {
    let sequences = df.column("sequence")?.str()?;

    let gc_content: Vec<Option<f64>> = sequences
        .into_iter()
        .map(|seq| seq.map(gc_fraction))
        .collect();

    let labels = df.column("label")?;

    let new_df = DataFrame::new(vec![
        labels.clone(),
        Column::new("gc_content".into(), gc_content),
    ])?;

    Ok(new_df)
}
