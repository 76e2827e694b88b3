use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum TransformError {
    /// Malformed input: constant arity, non-numeric constants, bad durations.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Well-formed but not supported, e.g. an unknown reducer token.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A defect in the caller or engine, never user error.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransformError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

pub type TransformResult<T> = Result<T, TransformError>;
