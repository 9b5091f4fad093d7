//! Error types for spool-common.

use thiserror::Error;

/// Errors raised while decoding shared types.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("digest must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;
