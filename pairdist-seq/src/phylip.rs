//! PHYLIP alignment reader and writer.
//!
//! Supports both interleaved and sequential layouts. The input starts with a
//! dimension line giving the number of taxa and sites. Names follow the
//! "relaxed" convention: a whitespace-delimited token of any length rather
//! than a fixed 10-character field.

use pairdist_core::{PairdistError, Result};

/// Residues per line (sequential) or per block (interleaved) when writing.
pub const BLOCK_SIZE: usize = 60;

/// Records parsed from a PHYLIP file, as `(name, aligned_sequence)` pairs.
pub type PhylipRecords = Vec<(String, String)>;

/// Parse a PHYLIP file, interleaved or sequential.
pub fn parse_phylip(input: &str, interleaved: bool) -> Result<PhylipRecords> {
    if interleaved {
        parse_interleaved(input)
    } else {
        parse_sequential(input)
    }
}

/// Parse an interleaved PHYLIP alignment.
///
/// The first block holds names followed by sequence data. Later blocks hold
/// sequence data only, in the same taxon order, separated by blank lines.
///
/// # Examples
///
/// ```
/// # use pairdist_seq::phylip::parse_interleaved;
/// let input = " 2 8\nseq1  ACGT\nseq2  TGCA\n\nACGT\nTGCA\n";
/// let records = parse_interleaved(input).unwrap();
/// assert_eq!(records[0].1, "ACGTACGT");
/// ```
pub fn parse_interleaved(input: &str) -> Result<PhylipRecords> {
    let mut lines = input.lines().peekable();
    let (n_taxa, n_sites) = parse_dimensions(&mut lines)?;
    skip_blank_lines(&mut lines);

    let mut names: Vec<String> = Vec::with_capacity(n_taxa.min(1024));
    let mut data: Vec<String> = Vec::with_capacity(n_taxa.min(1024));

    for _ in 0..n_taxa {
        let line = lines.next().ok_or_else(|| {
            PairdistError::Parse("unexpected end of input in first PHYLIP block".into())
        })?;
        let line = line.trim();
        if line.is_empty() {
            return Err(PairdistError::Parse(
                "unexpected blank line in first PHYLIP block".into(),
            ));
        }
        let (name, seq) = split_name_seq(line)?;
        names.push(name);
        data.push(seq);
    }

    loop {
        skip_blank_lines(&mut lines);
        if lines.peek().is_none() {
            break;
        }
        for seq in data.iter_mut() {
            let trimmed = match lines.next() {
                Some(l) => l.trim(),
                None => break,
            };
            if trimmed.is_empty() {
                break;
            }
            seq.extend(trimmed.chars().filter(|c| !c.is_whitespace()));
        }
    }

    check_site_counts(&names, &data, n_sites)?;
    Ok(names.into_iter().zip(data).collect())
}

/// Parse a sequential PHYLIP alignment.
///
/// Each taxon starts with its name (optionally followed by residues on the
/// same line) and continues until the declared number of sites is read.
///
/// # Examples
///
/// ```
/// # use pairdist_seq::phylip::parse_sequential;
/// let input = " 2 8\nseq1 ACGT\nACGT\nseq2\nTGCATGCA\n";
/// let records = parse_sequential(input).unwrap();
/// assert_eq!(records[0].1, "ACGTACGT");
/// assert_eq!(records[1].0, "seq2");
/// ```
pub fn parse_sequential(input: &str) -> Result<PhylipRecords> {
    let mut lines = input.lines().peekable();
    let (n_taxa, n_sites) = parse_dimensions(&mut lines)?;

    let mut records: PhylipRecords = Vec::with_capacity(n_taxa.min(1024));
    for _ in 0..n_taxa {
        skip_blank_lines(&mut lines);
        let first = lines.next().ok_or_else(|| {
            PairdistError::Parse(format!(
                "unexpected end of input: read {} of {} taxa",
                records.len(),
                n_taxa
            ))
        })?;
        let (name, mut seq) = split_name_seq(first.trim())?;

        while seq.len() < n_sites {
            let line = lines.next().ok_or_else(|| {
                PairdistError::Parse(format!(
                    "unexpected end of input for taxon '{}': got {} of {} sites",
                    name,
                    seq.len(),
                    n_sites
                ))
            })?;
            seq.extend(line.chars().filter(|c| !c.is_whitespace()));
        }
        if seq.len() != n_sites {
            return Err(PairdistError::Parse(format!(
                "taxon '{}': expected {} sites, found {}",
                name,
                n_sites,
                seq.len()
            )));
        }
        records.push((name, seq));
    }
    Ok(records)
}

/// Write records in relaxed PHYLIP, interleaved in blocks of
/// [`BLOCK_SIZE`] or sequential with one wrapped sequence per taxon.
///
/// # Examples
///
/// ```
/// # use pairdist_seq::phylip::write_phylip;
/// let out = write_phylip(&[("s1", "ACGT")], true);
/// assert!(out.starts_with(" 1 4\n"));
/// ```
pub fn write_phylip<N, S>(records: &[(N, S)], interleaved: bool) -> String
where
    N: AsRef<str>,
    S: AsRef<str>,
{
    let n_sites = records.first().map(|(_, s)| s.as_ref().len()).unwrap_or(0);
    let mut out = format!(" {} {}\n", records.len(), n_sites);
    if records.is_empty() {
        return out;
    }

    let pad = records
        .iter()
        .map(|(n, _)| n.as_ref().len())
        .max()
        .unwrap_or(0)
        + 2;

    if interleaved {
        let mut offset = 0;
        while offset < n_sites {
            let end = (offset + BLOCK_SIZE).min(n_sites);
            for (name, seq) in records {
                let fragment = seq.as_ref().get(offset..end).unwrap_or("");
                if offset == 0 {
                    out.push_str(&format!("{:<width$}{}\n", name.as_ref(), fragment, width = pad));
                } else {
                    out.push_str(fragment);
                    out.push('\n');
                }
            }
            if end < n_sites {
                out.push('\n');
            }
            offset = end;
        }
    } else {
        for (name, seq) in records {
            let seq = seq.as_ref();
            let first_end = BLOCK_SIZE.min(seq.len());
            out.push_str(&format!(
                "{:<width$}{}\n",
                name.as_ref(),
                &seq[..first_end],
                width = pad
            ));
            let mut offset = first_end;
            while offset < seq.len() {
                let end = (offset + BLOCK_SIZE).min(seq.len());
                out.push_str(&seq[offset..end]);
                out.push('\n');
                offset = end;
            }
        }
    }
    out
}

// ── Internal helpers ──

fn parse_dimensions<'a, I: Iterator<Item = &'a str>>(
    lines: &mut std::iter::Peekable<I>,
) -> Result<(usize, usize)> {
    let dim_line = loop {
        match lines.next() {
            Some(l) if !l.trim().is_empty() => break l.trim(),
            Some(_) => continue,
            None => {
                return Err(PairdistError::Parse(
                    "empty input: no PHYLIP dimension line".into(),
                ))
            }
        }
    };

    let mut parts = dim_line.split_whitespace();
    let mut field = |what: &str| -> Result<usize> {
        let token = parts.next().ok_or_else(|| {
            PairdistError::Parse(format!("invalid PHYLIP dimension line: '{}'", dim_line))
        })?;
        token.parse().map_err(|_| {
            PairdistError::Parse(format!("invalid {} '{}' in dimension line", what, token))
        })
    };
    let n_taxa = field("taxon count")?;
    let n_sites = field("site count")?;
    Ok((n_taxa, n_sites))
}

fn skip_blank_lines<'a, I: Iterator<Item = &'a str>>(lines: &mut std::iter::Peekable<I>) {
    while let Some(line) = lines.peek() {
        if line.trim().is_empty() {
            lines.next();
        } else {
            break;
        }
    }
}

fn split_name_seq(line: &str) -> Result<(String, String)> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let name = match parts.next() {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            return Err(PairdistError::Parse(format!(
                "could not parse name from line: '{}'",
                line
            )))
        }
    };
    let seq = parts
        .next()
        .map(|s| s.chars().filter(|c| !c.is_whitespace()).collect())
        .unwrap_or_default();
    Ok((name, seq))
}

fn check_site_counts(names: &[String], data: &[String], n_sites: usize) -> Result<()> {
    for (name, seq) in names.iter().zip(data) {
        if seq.len() != n_sites {
            return Err(PairdistError::Parse(format!(
                "taxon '{}': expected {} sites, found {}",
                name,
                n_sites,
                seq.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<(String, String)> {
        vec![
            ("alpha".to_string(), "ACGT".repeat(40)),
            ("b".to_string(), "TTGA".repeat(40)),
        ]
    }

    #[test]
    fn interleaved_round_trip() {
        let text = write_phylip(&records(), true);
        assert!(text.starts_with(" 2 160\n"));
        let back = parse_interleaved(&text).unwrap();
        assert_eq!(back, records());
    }

    #[test]
    fn sequential_round_trip() {
        let text = write_phylip(&records(), false);
        let back = parse_sequential(&text).unwrap();
        assert_eq!(back, records());
    }

    #[test]
    fn interleaved_with_spaces_inside_blocks() {
        let input = "2 10\nx ACGTA CGTAC\ny TTTTT GGGGG\n";
        let recs = parse_interleaved(input).unwrap();
        assert_eq!(recs[0].1, "ACGTACGTAC");
        assert_eq!(recs[1].1, "TTTTTGGGGG");
    }

    #[test]
    fn dimension_mismatch_error() {
        let input = " 2 10\ns1 ACGT\ns2 ACGT\n";
        assert!(parse_interleaved(input).is_err());
        assert!(parse_sequential(input).is_err());
    }

    #[test]
    fn bad_dimension_line() {
        assert!(parse_phylip("two 4\na ACGT\n", true).is_err());
        assert!(parse_phylip("", false).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_does_not_panic(s in "\\PC{0,200}", interleaved in any::<bool>()) {
            let _ = parse_phylip(&s, interleaved);
        }

        #[test]
        fn written_blocks_keep_sequences(seqs in proptest::collection::vec("[ACGT-]{130}", 1..5)) {
            let records: Vec<(String, String)> = seqs
                .into_iter()
                .enumerate()
                .map(|(i, s)| (format!("t{}", i), s))
                .collect();
            let text = write_phylip(&records, true);
            prop_assert_eq!(parse_interleaved(&text).unwrap(), records);
        }
    }
}
