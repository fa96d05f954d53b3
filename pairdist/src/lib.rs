//! # pairdist
//!
//! Pairwise evolutionary distances with variances, BioNJ trees, likelihood
//! optimisation and sequence simulation behind a single stateful [`Engine`].
//!
//! The numerical work lives in [`pairdist_phylo`]; alignments and their
//! file formats in [`pairdist_seq`]. This crate ties them together:
//!
//! - **[`Engine`]**: owns the alignment, the model and rates, and every
//!   result derived from them
//! - **[`EngineConfig`]**: variance floor, distance cap and optimiser
//!   stopping rules
//! - the `pairdist` binary (feature `cli`)

pub mod config;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{Engine, RateOrder};
pub use pairdist_core::{PairdistError, Result};
pub use pairdist_seq::{AlignmentFormat, DataType};
