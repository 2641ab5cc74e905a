// ============================================
// File: crates/spatialpair-common/src/error.rs
// ============================================
//! # Shared Error Type
//!
//! ## Creation Reason
//! Parameter checks (DH group, round counts, dial ranges) and remote id
//! parsing happen below the core, transport and node crates. They fail
//! with `CommonError`, which each of those crates lifts into its own
//! error enum through a `#[from]` variant.
//!
//! ## Main Functionality
//! - `CommonError`: rejected parameter, wrong length, out-of-range value,
//!   malformed base64
//! - `Result<T>`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Messages may name a field, never its secret value
//! - Timeouts belong to the crate that owns the blocking step
//!   (`TransportError::Timeout`, `PairingError::InterlockTimeout`)
//!
//! ## Last Modified
//! v0.1.0 - Parameter and identifier errors

use thiserror::Error;

/// Result alias for `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;

/// A parameter or identifier failed validation.
///
/// # Example
/// ```
/// use spatialpair_common::error::{CommonError, Result};
///
/// fn check_rounds(rounds: usize) -> Result<()> {
///     if !(2..=128).contains(&rounds) {
///         return Err(CommonError::out_of_range(rounds, 2, 128));
///     }
///     Ok(())
/// }
///
/// assert!(check_rounds(1).is_err());
/// assert!(check_rounds(8).is_ok());
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    /// A named parameter was rejected.
    #[error("{field} rejected: {reason}")]
    InvalidInput {
        /// Parameter name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// A byte string had the wrong size.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required size
        expected: usize,
        /// Size received
        actual: usize,
    },

    /// A numeric value fell outside an inclusive range.
    #[error("{value} outside [{min}, {max}]")]
    OutOfRange {
        /// Offending value
        value: String,
        /// Lower bound
        min: String,
        /// Upper bound
        max: String,
    },

    /// Text that should be base64 was not.
    #[error("malformed base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}

impl CommonError {
    /// Builds an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Builds an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Builds an `OutOfRange` error.
    pub fn out_of_range(value: impl ToString, min: impl ToString, max: impl ToString) -> Self {
        Self::OutOfRange {
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn test_invalid_input_names_field() {
        let err = CommonError::invalid_input("threshold", "must be within [0, 1]");
        assert_eq!(err.to_string(), "threshold rejected: must be within [0, 1]");
    }

    #[test]
    fn test_out_of_range_message() {
        let err = CommonError::out_of_range(200, 2, 128);
        assert_eq!(err.to_string(), "200 outside [2, 128]");
    }

    #[test]
    fn test_base64_failure_converts() {
        let err: CommonError = STANDARD.decode("not base64!").unwrap_err().into();
        assert!(matches!(err, CommonError::InvalidEncoding(_)));
        assert!(err.to_string().starts_with("malformed base64"));
    }
}
