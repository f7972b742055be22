//! Type-level validation errors

use thiserror::Error;

/// Errors raised while validating or decoding grid types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Duplicate workload name: {0}")]
    DuplicateWorkloadName(String),

    #[error("Invalid workload name: {0:?}")]
    InvalidWorkloadName(String),

    #[error("Invalid ip network {input:?}: {reason}")]
    InvalidIpNet { input: String, reason: String },

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Payload decode error: {0}")]
    Payload(String),
}

/// Result type for type-level operations
pub type Result<T> = std::result::Result<T, TypesError>;
