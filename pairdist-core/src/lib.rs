//! Shared primitives for the pairdist phylogenetics engine.
//!
//! - **Error types**: [`PairdistError`] and [`Result`] for structured error handling
//! - **Traits**: small abstractions ([`Sequence`], [`Annotated`], [`Summarizable`])
//!   implemented by alignments, records and trees across the workspace

pub mod error;
pub mod traits;

pub use error::{PairdistError, Result};
pub use traits::*;
