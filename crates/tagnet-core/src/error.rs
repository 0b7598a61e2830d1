//! # Error Types
//!
//! Domain-specific error types for tagnet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tagnet-core errors (this file)                                        │
//! │  └── ValidationError  - Tag configuration field failures               │
//! │                                                                         │
//! │  tagnet-fleet errors (separate crate)                                  │
//! │  └── FleetError       - Transport, correlation and sink failures       │
//! │                                                                         │
//! │  Flow: ValidationError → FleetError → caller                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (tag id, offending value)
//! 3. Errors are enum variants, never String

use thiserror::Error;

/// Result type alias for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Tag configuration validation failures.
///
/// These errors are surfaced to the operator before a `SET` command is ever
/// sent, so a device never receives a payload it would have to reject.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Tag id must be a positive integer.
    #[error("Tag id must be positive, got {0}")]
    InvalidTagId(i64),

    /// Price must be non-negative.
    #[error("Price cannot be negative: {0}")]
    NegativePrice(f64),

    /// Price must be a finite number (no NaN/infinity on the wire).
    #[error("Price is not a finite number")]
    NonFinitePrice,

    /// Location string is empty or whitespace.
    #[error("Location cannot be empty")]
    EmptyLocation,

    /// Location string exceeds the display budget of a shelf label.
    #[error("Location too long: {len} characters (max {max})")]
    LocationTooLong { len: usize, max: usize },

    /// Hardware UID must be an even-length hex string.
    #[error("Invalid hardware UID: {0:?}")]
    InvalidUid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = ValidationError::LocationTooLong { len: 99, max: 64 };
        assert!(err.to_string().contains("99"));
        assert!(err.to_string().contains("64"));

        let err = ValidationError::InvalidTagId(-3);
        assert!(err.to_string().contains("-3"));
    }
}
