//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or normalizing protocol data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A cursor string could not be parsed as a timestamp.
    #[error("invalid sync cursor: {value:?}")]
    InvalidCursor {
        /// The rejected text.
        value: String,
    },

    /// A record or payload lacks a required identity field.
    #[error("{kind} is missing required identity field `{field}`")]
    MissingIdentity {
        /// Entity kind name.
        kind: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// A field held a value of the wrong shape.
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// The rejected text.
        value: String,
    },
}
