//! Ledger error types

use grid_types::ContractId;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The ledger refused the extrinsic
    #[error("Ledger rejected request: {0}")]
    Rejected(String),

    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    #[error("Not a node contract: {0}")]
    NotNodeContract(ContractId),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
