use crate::error::{HaystackError, Result};
use crate::pwm::{Background, MotifRecord, Pwm};
use crate::types::base_index;
use log::{debug, info};
use ndarray::Array2;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::iter::Peekable;
use std::path::Path;

const BACKGROUND_HEADER: &str = "Background letter frequencies";
const MATRIX_HEADER: &str = "letter-probability matrix";

/// Advances the iterator until a MOTIF line is found, collecting the
/// background frequencies of the file header on the way
fn skip_until_motif<I>(lines: &mut Peekable<I>, background: &mut Option<Background>) -> Result<()>
where
    I: Iterator<Item = io::Result<String>>,
{
    while let Some(Ok(line)) = lines.peek() {
        if line.starts_with("MOTIF") {
            break;
        }
        let in_background = line.starts_with(BACKGROUND_HEADER);
        lines.next();
        if in_background {
            *background = Some(parse_background_block(lines)?);
        }
    }
    Ok(())
}

/// Reads `A 0.25 C 0.25 ...` pairs from the lines following the header
fn parse_background_block<I>(lines: &mut Peekable<I>) -> Result<Background>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut frequencies = [None; 4];
    while frequencies.iter().any(Option::is_none) {
        let line = match lines.peek() {
            Some(Ok(line)) if !line.starts_with("MOTIF") => lines.next().transpose()?,
            _ => None,
        };
        let Some(line) = line else { break };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        read_frequency_pairs(&tokens, &mut frequencies)?;
    }
    collect_frequencies(frequencies)
}

fn read_frequency_pairs(tokens: &[&str], frequencies: &mut [Option<f64>; 4]) -> Result<()> {
    for pair in tokens.chunks(2) {
        let [letter, value] = pair else {
            return Err(HaystackError::InvalidFileFormat(format!(
                "Dangling background entry `{}`",
                pair.join(" ")
            )));
        };
        // higher-order entries such as `AC 0.05` are not used
        let mut chars = letter.chars();
        let (Some(base), None) = (chars.next(), chars.next()) else {
            continue;
        };
        if let Some(idx) = base_index(base) {
            let value = value.parse::<f64>().map_err(|e| {
                HaystackError::InvalidFileFormat(format!("Invalid background value: {}", e))
            })?;
            frequencies[idx] = Some(value);
        }
    }
    Ok(())
}

fn collect_frequencies(frequencies: [Option<f64>; 4]) -> Result<Background> {
    match frequencies {
        [Some(a), Some(c), Some(g), Some(t)] => Background::normalized([a, c, g, t]),
        _ => Err(HaystackError::InvalidFileFormat(
            "Background must list A, C, G and T".into(),
        )),
    }
}

/// Parses a single motif block from the iterator
fn parse_motif<I>(
    lines: &mut Peekable<I>,
    background: Background,
    pseudocount: f64,
) -> Result<Option<MotifRecord>>
where
    I: Iterator<Item = io::Result<String>>,
{
    // Get motif ID from MOTIF line
    let motif_line = match lines.next().transpose()? {
        Some(line) if line.starts_with("MOTIF") => line,
        _ => return Ok(None),
    };
    let mut fields = motif_line.split_whitespace().skip(1);
    let id = fields
        .next()
        .ok_or_else(|| HaystackError::InvalidFileFormat("Missing motif ID".into()))?
        .to_string();
    let name = fields.next().map(str::to_string);

    // Find the matrix header of this block
    let width = loop {
        let line = match lines.peek() {
            Some(Ok(line)) if line.starts_with("MOTIF") => None,
            Some(_) => lines.next().transpose()?,
            None => None,
        };
        let Some(line) = line else {
            return Err(HaystackError::InvalidFileFormat(format!(
                "Motif {} has no {} section",
                id, MATRIX_HEADER
            )));
        };
        if line.trim_start().starts_with(MATRIX_HEADER) {
            break matrix_width(&line, &id)?;
        }
    };

    // Read exactly `width` rows, skipping blank lines
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(width);
    while rows.len() < width {
        let line = lines.next().transpose()?.ok_or_else(|| {
            HaystackError::InvalidFileFormat(format!(
                "Motif {} ends after {} of {} rows",
                id,
                rows.len(),
                width
            ))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                HaystackError::InvalidFileFormat(format!(
                    "Invalid PWM value in motif {}: {}",
                    id, e
                ))
            })?;
        if values.len() != 4 {
            return Err(HaystackError::InvalidFileFormat(format!(
                "Motif {} row {} has {} values, expected 4",
                id,
                rows.len() + 1,
                values.len()
            )));
        }
        rows.push(values);
    }

    let counts = Array2::from_shape_fn((width, 4), |(i, j)| rows[i][j]);
    let pwm = Pwm::from_counts(counts, background, pseudocount)?;
    Ok(Some(MotifRecord { id, name, pwm }))
}

/// Value of the `w=` field of a matrix header
fn matrix_width(line: &str, id: &str) -> Result<usize> {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = match token.strip_prefix("w=") {
            Some("") => tokens.next(),
            Some(value) => Some(value),
            None => continue,
        };
        return value
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|w| *w > 0)
            .ok_or_else(|| {
                HaystackError::InvalidFileFormat(format!("Motif {} has an invalid width", id))
            });
    }
    Err(HaystackError::InvalidFileFormat(format!(
        "Motif {} does not declare its width",
        id
    )))
}

/// Parses MEME-formatted motifs from any reader.
///
/// See [`read_meme_motifs`].
pub fn parse_meme<R: BufRead>(
    reader: R,
    background: Option<Background>,
    pseudocount: f64,
) -> Result<Vec<MotifRecord>> {
    let mut lines = reader.lines().peekable();
    let mut file_background = None;

    // Skip header until first MOTIF
    skip_until_motif(&mut lines, &mut file_background)?;
    let background = background.or(file_background).unwrap_or_default();
    debug!("Motif background: {:?}", background.frequencies());

    // Parse all motifs
    let mut motifs = Vec::new();
    while let Some(motif) = parse_motif(&mut lines, background, pseudocount)? {
        motifs.push(motif);
        let mut ignored = None;
        skip_until_motif(&mut lines, &mut ignored)?;
    }

    if motifs.is_empty() {
        return Err(HaystackError::InvalidFileFormat("No motifs found".into()));
    }
    Ok(motifs)
}

/// Reads position weight matrices from a MEME format file
///
/// Each motif starts with a `MOTIF <id> [<name>]` line, followed by a
/// `letter-probability matrix:` line giving the width as `w= <n>` and then
/// `n` rows of A, C, G, T frequencies.
///
/// # Arguments
/// * `filename` - Path to the MEME file
/// * `background` - Background for the log-odds; defaults to the file's
///   `Background letter frequencies`, or uniform when the file has none
/// * `pseudocount` - Pseudocount weight, see [`Pwm::from_counts`]
///
/// # Returns
/// * `Result<Vec<MotifRecord>>` - The motifs in file order
///
/// # Errors
/// * `HaystackError::Io` - If the file cannot be opened or read
/// * `HaystackError::InvalidFileFormat` - If a block is malformed or no motif is found
/// * `HaystackError::InvalidPwm` - If a matrix cannot be turned into a PWM
///
/// # Example
/// ```ignore
/// use haystack_rs::meme::read_meme_motifs;
/// use haystack_rs::pwm::DEFAULT_PSEUDOCOUNT;
///
/// let motifs = read_meme_motifs("path/to/motifs.meme", None, DEFAULT_PSEUDOCOUNT).unwrap();
/// for motif in motifs {
///     println!("Found motif: {} {}", motif.id, motif.pwm.consensus());
/// }
/// ```
pub fn read_meme_motifs(
    filename: impl AsRef<Path>,
    background: Option<Background>,
    pseudocount: f64,
) -> Result<Vec<MotifRecord>> {
    let file = File::open(filename.as_ref())?;
    let motifs = parse_meme(BufReader::new(file), background, pseudocount)?;
    info!(
        "Read {} motifs from {}",
        motifs.len(),
        filename.as_ref().display()
    );
    Ok(motifs)
}

/// Reads a MEME background model file (`A 0.29` per line, `#` comments).
/// Only the order-0 frequencies are used.
pub fn read_meme_background(filename: impl AsRef<Path>) -> Result<Background> {
    let reader = BufReader::new(File::open(filename)?);
    let mut frequencies = [None; 4];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        read_frequency_pairs(&tokens, &mut frequencies)?;
    }
    collect_frequencies(frequencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_is_read_with_or_without_space() {
        let line = "letter-probability matrix: alength= 4 w= 6 nsites= 20 E= 0";
        assert_eq!(matrix_width(line, "m").unwrap(), 6);
        assert_eq!(matrix_width("letter-probability matrix: w=3", "m").unwrap(), 3);
        assert!(matrix_width("letter-probability matrix: alength= 4", "m").is_err());
    }
}
