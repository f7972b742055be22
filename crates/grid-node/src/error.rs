//! Node gateway error types

use crate::bus::BusError;
use std::time::Duration;
use thiserror::Error;

/// Node gateway errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// No deployment exists for the requested contract
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Node unreachable: {0}")]
    Unreachable(String),

    #[error("Node call timed out after {0:?}")]
    Timeout(Duration),

    /// The node received the request and refused it
    #[error("Node rejected request: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::NotFound(_))
    }

    /// Transport-level failures the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Unreachable(_) | NodeError::Timeout(_))
    }
}

impl From<BusError> for NodeError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(after) => NodeError::Timeout(after),
            BusError::Unreachable(reason) => NodeError::Unreachable(reason),
            BusError::Remote(message) if message.to_lowercase().contains("not found") => {
                NodeError::NotFound(message)
            }
            BusError::Remote(message) => NodeError::Rejected(message),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

/// Result type for node gateway operations
pub type Result<T> = std::result::Result<T, NodeError>;
