//! Structured error types for pairdist.

use thiserror::Error;

/// Unified error type for all pairdist operations.
#[derive(Debug, Error)]
pub enum PairdistError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed alignment or tree input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or incompatible configuration: no model, no rates,
    /// model/datatype mismatch, unknown format or ordering token.
    #[error("configuration error: {0}")]
    Config(String),

    /// A matrix or vector of the wrong size was supplied.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    Dimension { expected: usize, found: usize },

    /// A derived result was requested before it was computed.
    #[error("not computed: {0}")]
    NotComputed(String),

    /// Likelihood state was requested before initialisation.
    #[error("uninitialised: {0}")]
    Uninitialised(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout pairdist.
pub type Result<T> = std::result::Result<T, PairdistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_message() {
        let err = PairdistError::Dimension {
            expected: 4,
            found: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 4, found 3");
    }

    #[test]
    fn io_converts() {
        fn open() -> Result<()> {
            std::fs::File::open("/definitely/not/here")?;
            Ok(())
        }
        assert!(matches!(open(), Err(PairdistError::Io(_))));
    }
}
