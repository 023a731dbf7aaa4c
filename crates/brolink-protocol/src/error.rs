//! Error types for the marshaling layer.

use thiserror::Error;

use crate::tag::TypeTag;

/// Errors raised while building, encoding, or reading typed values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("unsupported type: {0}")]
    UnsupportedType(TypeTag),
    #[error("resource disposed: {0}")]
    ResourceDisposed(&'static str),
    #[error("allocation failure: {0}")]
    AllocationFailure(&'static str),
}

impl MarshalError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ArgumentInvalid(message.into())
    }

    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Convenience result type for marshaling operations.
pub type MarshalResult<T> = Result<T, MarshalError>;
