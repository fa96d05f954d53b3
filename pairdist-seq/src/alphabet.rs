//! Alphabet definitions for nucleotide and amino-acid alignments.
//!
//! Each alphabet is a zero-sized marker type implementing [`Alphabet`],
//! which fixes the canonical state order and the IUPAC ambiguity sets.
//! [`DataType`] is the runtime switch between the two, chosen once when an
//! alignment is loaded.

use std::fmt;
use std::str::FromStr;

use pairdist_core::{PairdistError, Result};

/// Trait for biological sequence alphabets.
///
/// Sequence bytes are upper-cased before lookup. Every valid byte maps to a
/// non-empty set of states, encoded as a bit mask over [`Alphabet::STATES`].
pub trait Alphabet: Clone + 'static {
    /// Human-readable name (e.g. "DNA").
    const NAME: &'static str;

    /// The states in canonical model order.
    const STATES: &'static [u8];

    /// Bit mask of the states compatible with `b`, or `None` if `b` is not
    /// part of the alphabet.
    fn state_mask(b: u8) -> Option<u32>;

    /// Number of states.
    fn n_states() -> usize {
        Self::STATES.len()
    }

    /// Mask with every state set; used for gaps and unknown characters.
    fn full_mask() -> u32 {
        (1u32 << Self::STATES.len()) - 1
    }

    /// Check whether a byte (assumed already uppercased) is valid.
    fn is_valid(b: u8) -> bool {
        Self::state_mask(b).is_some()
    }

    /// Index of an unambiguous state.
    fn state_index(b: u8) -> Option<usize> {
        Self::STATES.iter().position(|&s| s == b)
    }
}

/// Gap characters shared by both alphabets.
pub fn is_gap(b: u8) -> bool {
    matches!(b, b'-' | b'.')
}

/// The byte written for an unknown character after gap remapping.
pub const UNKNOWN: u8 = b'?';

/// IUPAC DNA alphabet over states `ACGT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DnaAlphabet;

impl Alphabet for DnaAlphabet {
    const NAME: &'static str = "DNA";
    const STATES: &'static [u8] = b"ACGT";

    fn state_mask(b: u8) -> Option<u32> {
        const A: u32 = 1;
        const C: u32 = 2;
        const G: u32 = 4;
        const T: u32 = 8;
        let mask = match b {
            b'A' => A,
            b'C' => C,
            b'G' => G,
            b'T' | b'U' => T,
            b'R' => A | G,
            b'Y' => C | T,
            b'S' => C | G,
            b'W' => A | T,
            b'K' => G | T,
            b'M' => A | C,
            b'B' => C | G | T,
            b'D' => A | G | T,
            b'H' => A | C | T,
            b'V' => A | C | G,
            b'N' | b'X' | b'?' | b'-' | b'.' => A | C | G | T,
            _ => return None,
        };
        Some(mask)
    }
}

/// Protein alphabet over the 20 amino acids in `ARNDCQEGHILKMFPSTWYV` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProteinAlphabet;

impl Alphabet for ProteinAlphabet {
    const NAME: &'static str = "Protein";
    const STATES: &'static [u8] = b"ARNDCQEGHILKMFPSTWYV";

    fn state_mask(b: u8) -> Option<u32> {
        if let Some(i) = Self::state_index(b) {
            return Some(1 << i);
        }
        let bit = |c: u8| Self::state_index(c).map(|i| 1u32 << i).unwrap_or(0);
        match b {
            b'B' => Some(bit(b'D') | bit(b'N')),
            b'Z' => Some(bit(b'E') | bit(b'Q')),
            b'J' => Some(bit(b'I') | bit(b'L')),
            b'X' | b'U' | b'O' | b'*' | b'?' | b'-' | b'.' => Some(Self::full_mask()),
            _ => None,
        }
    }
}

/// Runtime data type of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Dna,
    Protein,
}

impl DataType {
    /// Parse a datatype tag. Accepts `dna`/`nt` and `aa`/`protein` plus a few
    /// common synonyms, case-insensitively.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "dna" | "nt" | "nuc" | "nucleotide" => Ok(DataType::Dna),
            "aa" | "protein" | "prot" | "amino" => Ok(DataType::Protein),
            other => Err(PairdistError::Config(format!(
                "unrecognised datatype '{}': expected dna/nt or aa/protein",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Dna => DnaAlphabet::NAME,
            DataType::Protein => ProteinAlphabet::NAME,
        }
    }

    /// Number of model states (4 or 20).
    pub fn n_states(self) -> usize {
        self.states().len()
    }

    /// State symbols in canonical order.
    pub fn states(self) -> &'static [u8] {
        match self {
            DataType::Dna => DnaAlphabet::STATES,
            DataType::Protein => ProteinAlphabet::STATES,
        }
    }

    /// The data type matching a model's state count, if any.
    pub fn from_n_states(n: usize) -> Option<Self> {
        match n {
            4 => Some(DataType::Dna),
            20 => Some(DataType::Protein),
            _ => None,
        }
    }

    pub fn state_mask(self, b: u8) -> Option<u32> {
        match self {
            DataType::Dna => DnaAlphabet::state_mask(b),
            DataType::Protein => ProteinAlphabet::state_mask(b),
        }
    }

    pub fn is_valid(self, b: u8) -> bool {
        self.state_mask(b).is_some()
    }

    /// Normalise a raw input byte: uppercase, and read `U` as `T` for DNA.
    pub fn normalise(self, b: u8) -> u8 {
        let up = b.to_ascii_uppercase();
        match (self, up) {
            (DataType::Dna, b'U') => b'T',
            _ => up,
        }
    }

    /// Write the conditional tip likelihoods for byte `b` into `out`
    /// (1.0 for every compatible state, 0.0 otherwise). Bytes outside the
    /// alphabet are treated as unknown.
    pub fn fill_tip(self, b: u8, out: &mut [f64]) {
        let mask = self
            .state_mask(b)
            .unwrap_or((1u32 << self.n_states()) - 1);
        for (i, v) in out.iter_mut().enumerate() {
            *v = if mask & (1 << i) != 0 { 1.0 } else { 0.0 };
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = PairdistError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::from_tag(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dna_accepts_all_iupac_bases() {
        for &b in b"ACGTUNRYSWKMBDHV-.?" {
            assert!(DnaAlphabet::is_valid(b), "DNA should accept {}", b as char);
        }
    }

    #[test]
    fn dna_rejects_protein_letters() {
        assert!(!DnaAlphabet::is_valid(b'E'));
        assert!(!DnaAlphabet::is_valid(b'L'));
    }

    #[test]
    fn protein_accepts_full_set() {
        for &b in b"ACDEFGHIKLMNPQRSTVWYXBZJUO*-?" {
            assert!(
                ProteinAlphabet::is_valid(b),
                "Protein should accept {}",
                b as char
            );
        }
    }

    #[test]
    fn state_orders() {
        assert_eq!(DnaAlphabet::state_index(b'G'), Some(2));
        assert_eq!(ProteinAlphabet::state_index(b'R'), Some(1));
        assert_eq!(ProteinAlphabet::state_index(b'V'), Some(19));
        assert_eq!(DataType::Protein.n_states(), 20);
    }

    #[test]
    fn ambiguity_masks() {
        assert_eq!(DnaAlphabet::state_mask(b'R'), Some(0b0101));
        assert_eq!(DnaAlphabet::state_mask(b'N'), Some(0b1111));
        let b = ProteinAlphabet::state_mask(b'B').unwrap();
        assert_eq!(b.count_ones(), 2);
        assert_eq!(ProteinAlphabet::state_mask(b'-'), Some((1 << 20) - 1));
    }

    #[test]
    fn datatype_tags() {
        assert_eq!(DataType::from_tag("dna").unwrap(), DataType::Dna);
        assert_eq!(DataType::from_tag("NT").unwrap(), DataType::Dna);
        assert_eq!(DataType::from_tag("aa").unwrap(), DataType::Protein);
        assert_eq!("protein".parse::<DataType>().unwrap(), DataType::Protein);
        assert!(matches!(
            DataType::from_tag("codon"),
            Err(PairdistError::Config(_))
        ));
    }

    #[test]
    fn tip_vectors() {
        let mut out = [0.0; 4];
        DataType::Dna.fill_tip(b'Y', &mut out);
        assert_eq!(out, [0.0, 1.0, 0.0, 1.0]);
        DataType::Dna.fill_tip(b'-', &mut out);
        assert_eq!(out, [1.0; 4]);
    }

    #[test]
    fn rna_u_normalised_for_dna() {
        assert_eq!(DataType::Dna.normalise(b'u'), b'T');
        assert_eq!(DataType::Protein.normalise(b'u'), b'U');
    }
}
