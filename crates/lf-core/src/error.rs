//! Error types for lossfit

use thiserror::Error;

/// lossfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Shape or length mismatch between inputs that must line up.
    #[error("Value error: {0}")]
    Value(String),

    /// Operation applied to an operand of the wrong kind (e.g. a canonical
    /// `Domain` compared with raw limits).
    #[error("Type error: {0}")]
    Type(String),

    /// The same parameter carries more than one constraint.
    #[error("Duplicate constraint on parameter '{0}'")]
    DuplicateConstraint(String),

    /// A constraint density that cannot act as a single-value prior.
    #[error("Domain error: {0}")]
    Domain(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
