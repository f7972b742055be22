//! Message bus boundary
//!
//! Nodes are addressed by the twin that operates them. The bus carries a
//! command name plus a JSON payload and returns the JSON reply.

use async_trait::async_trait;
use grid_types::TwinId;
use std::time::Duration;
use thiserror::Error;

/// Transport errors surfaced by a message bus
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Destination unreachable: {0}")]
    Unreachable(String),

    /// Error string returned by the remote handler
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Request/response client for the message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send `command` with `payload` to `twin` and wait for the reply
    async fn call(
        &self,
        twin: TwinId,
        command: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, BusError>;
}
