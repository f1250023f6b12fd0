use thiserror::Error;

/// Unified error type for `cbcrs` operations.
#[derive(Debug, Error)]
pub enum ConjointError {
    /// Raised when a schema, design size or option combination is structurally invalid.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Human-readable description of the offending setting.
        reason: String,
    },

    /// Raised when provided arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, usually implied by the schema or design size.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when imported data does not belong to the design it is scored against.
    #[error("design hash mismatch: expected {expected}, found {found}")]
    DesignMismatch { expected: String, found: String },

    /// Raised when the information matrix stays singular after ridge regularization.
    #[error("information matrix is singular; column `{column}` appears collinear")]
    NumericalSingularity {
        /// Encoded column with the largest loading on the degenerate direction.
        column: String,
    },

    /// Raised when numerical routines produce NaN or infinite values.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },

    /// Raised when an encoded row is not a valid effects-coded pattern.
    #[error("encoded row {row} has no valid level for attribute `{attribute}`")]
    InvalidEncoding { row: usize, attribute: String },

    /// Raised when an imported design or choice file is malformed.
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl ConjointError {
    /// Helper to format a [`Configuration`](ConjointError::Configuration) error.
    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Helper to format a [`DimensionMismatch`](ConjointError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for parse failures tied to a 1-based line number.
    pub fn parse<S: Into<String>>(line: usize, reason: S) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ConjointError>;
