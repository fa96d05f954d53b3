//! Alignments and alphabets for pairdist.
//!
//! - [`alphabet`]: DNA and protein alphabets, IUPAC ambiguity sets, [`DataType`]
//! - [`alignment`]: the validated [`Alignment`] container and [`AlignmentFormat`]
//! - [`fasta`]: FASTA reading (needletail) and writing
//! - [`phylip`]: relaxed PHYLIP, interleaved and sequential

pub mod alignment;
pub mod alphabet;
pub mod fasta;
pub mod phylip;

pub use alignment::{Alignment, AlignmentFormat, SequenceRecord};
pub use alphabet::{Alphabet, DataType, DnaAlphabet, ProteinAlphabet};
