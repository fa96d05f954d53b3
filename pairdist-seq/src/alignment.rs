//! Multiple sequence alignments over a single [`DataType`].

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use pairdist_core::{Annotated, PairdistError, Result, Sequence, Summarizable};

use crate::alphabet::{is_gap, DataType, UNKNOWN};
use crate::{fasta, phylip};

/// On-disk alignment format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    Fasta,
    Phylip,
}

impl FromStr for AlignmentFormat {
    type Err = PairdistError;

    /// Accepts `fas`/`fasta` and `phy`/`phylip`, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fas" | "fasta" => Ok(AlignmentFormat::Fasta),
            "phy" | "phylip" => Ok(AlignmentFormat::Phylip),
            other => Err(PairdistError::Config(format!(
                "unrecognised file format '{}': expected fasta or phylip",
                other
            ))),
        }
    }
}

impl fmt::Display for AlignmentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentFormat::Fasta => f.write_str("fasta"),
            AlignmentFormat::Phylip => f.write_str("phylip"),
        }
    }
}

/// A named, aligned sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceRecord {
    name: String,
    seq: Vec<u8>,
}

impl SequenceRecord {
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            seq: seq.into(),
        }
    }

    /// The sequence as text (all bytes are ASCII after validation).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.seq).unwrap_or("")
    }
}

impl Sequence for SequenceRecord {
    fn as_bytes(&self) -> &[u8] {
        &self.seq
    }
}

impl Annotated for SequenceRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered set of equal-length sequences sharing one alphabet.
///
/// Bytes are normalised on construction (uppercased, `U` read as `T` for
/// DNA) and validated against the alphabet. Names must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alignment {
    data_type: DataType,
    records: Vec<SequenceRecord>,
}

impl Alignment {
    /// Build an alignment, normalising and validating every record.
    pub fn new(data_type: DataType, records: Vec<SequenceRecord>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        let n_sites = records.first().map(|r| r.seq.len()).unwrap_or(0);
        let mut normalised = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.name.clone()) {
                return Err(PairdistError::InvalidInput(format!(
                    "duplicate sequence name '{}'",
                    record.name
                )));
            }
            if record.seq.len() != n_sites {
                return Err(PairdistError::InvalidInput(format!(
                    "sequence '{}' has length {}, expected {}",
                    record.name,
                    record.seq.len(),
                    n_sites
                )));
            }
            let mut seq = record.seq;
            for (pos, b) in seq.iter_mut().enumerate() {
                *b = data_type.normalise(*b);
                if !data_type.is_valid(*b) {
                    return Err(PairdistError::InvalidInput(format!(
                        "sequence '{}': invalid {} character '{}' at position {}",
                        record.name,
                        data_type,
                        *b as char,
                        pos + 1
                    )));
                }
            }
            normalised.push(SequenceRecord {
                name: record.name,
                seq,
            });
        }

        Ok(Self {
            data_type,
            records: normalised,
        })
    }

    /// Build an alignment from `(name, sequence)` pairs.
    ///
    /// # Examples
    ///
    /// ```
    /// use pairdist_seq::{Alignment, DataType};
    ///
    /// let aln = Alignment::from_pairs(vec![("a", "ACGT"), ("b", "acgu")], DataType::Dna).unwrap();
    /// assert_eq!(aln.n_sites(), 4);
    /// assert_eq!(aln.row(1), b"ACGT");
    /// ```
    pub fn from_pairs<I, N, S>(pairs: I, data_type: DataType) -> Result<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<[u8]>,
    {
        let records = pairs
            .into_iter()
            .map(|(n, s)| SequenceRecord::new(n, s.as_ref().to_vec()))
            .collect();
        Self::new(data_type, records)
    }

    /// Read an alignment file in the given format.
    ///
    /// `interleaved` only applies to PHYLIP.
    pub fn read(
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        data_type: DataType,
        interleaved: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        match format {
            AlignmentFormat::Fasta => {
                let records = fasta::read_fasta(path)?;
                Self::from_pairs(records, data_type)
            }
            AlignmentFormat::Phylip => {
                let text = fs::read_to_string(path)?;
                let records = phylip::parse_phylip(&text, interleaved)?;
                Self::from_pairs(records, data_type)
            }
        }
    }

    /// Write the alignment to `path` in the given format.
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        interleaved: bool,
    ) -> Result<()> {
        let pairs = self.to_pairs();
        match format {
            AlignmentFormat::Fasta => {
                let mut buf = Vec::new();
                fasta::write_fasta(&mut buf, &pairs)?;
                fs::write(path, buf)?;
            }
            AlignmentFormat::Phylip => {
                fs::write(path, phylip::write_phylip(&pairs, interleaved))?;
            }
        }
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of aligned columns.
    pub fn n_sites(&self) -> usize {
        self.records.first().map(|r| r.seq.len()).unwrap_or(0)
    }

    pub fn records(&self) -> &[SequenceRecord] {
        &self.records
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    /// Bytes of the `i`-th sequence.
    pub fn row(&self, i: usize) -> &[u8] {
        &self.records[i].seq
    }

    /// Index of the sequence called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.name == name)
    }

    /// A copy in which gap characters are replaced by the unknown symbol,
    /// so gapped positions carry no information in likelihood calculations.
    pub fn with_gaps_as_unknown(&self) -> Alignment {
        let records = self
            .records
            .iter()
            .map(|r| SequenceRecord {
                name: r.name.clone(),
                seq: r
                    .seq
                    .iter()
                    .map(|&b| if is_gap(b) { UNKNOWN } else { b })
                    .collect(),
            })
            .collect();
        Alignment {
            data_type: self.data_type,
            records,
        }
    }

    /// `(name, sequence)` pairs as owned strings.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.records
            .iter()
            .map(|r| (r.name.clone(), r.as_str().to_string()))
            .collect()
    }
}

impl Summarizable for Alignment {
    fn summary(&self) -> String {
        format!(
            "{} alignment: {} sequences x {} sites",
            self.data_type,
            self.len(),
            self.n_sites()
        )
    }
}
