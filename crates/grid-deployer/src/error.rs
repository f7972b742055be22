//! Engine error types
//!
//! Forward failures and compensation outcomes are reported separately so a
//! caller can tell "rejected and rolled back" from "rejected and the
//! rollback failed too".

use grid_ledger::LedgerError;
use grid_node::NodeError;
use grid_types::{ContractId, NodeContracts, NodeId, TypesError};
use std::fmt;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum DeployError {
    /// Deployment or contract absent; expected after a delete
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure or timeout; the caller may retry
    #[error("Remote unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Ledger rejected: {0}")]
    LedgerRejected(String),

    #[error("Node rejected: {0}")]
    NodeRejected(String),

    #[error(transparent)]
    PartialBatchFailure(Box<BatchFailure>),

    #[error("Nodes unreachable: {}", format_down(.0))]
    NodesUnreachable(Vec<(NodeId, String)>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

fn format_down(down: &[(NodeId, String)]) -> String {
    down.iter()
        .map(|(node, reason)| format!("{}: {}", node, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeployError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployError::NotFound(_))
    }
}

impl From<NodeError> for DeployError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::NotFound(what) => DeployError::NotFound(what),
            NodeError::Unreachable(_) | NodeError::Timeout(_) => {
                DeployError::RemoteUnreachable(err.to_string())
            }
            NodeError::Rejected(reason) => DeployError::NodeRejected(reason),
            NodeError::Serialization(_) => DeployError::NodeRejected(err.to_string()),
            NodeError::InvalidConfig(reason) => DeployError::Validation(reason),
        }
    }
}

impl From<LedgerError> for DeployError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => DeployError::NotFound(what),
            LedgerError::Unreachable(_) => DeployError::RemoteUnreachable(err.to_string()),
            LedgerError::Rejected(_)
            | LedgerError::NotNodeContract(_)
            | LedgerError::Unauthorized(_) => DeployError::LedgerRejected(err.to_string()),
        }
    }
}

impl From<TypesError> for DeployError {
    fn from(err: TypesError) -> Self {
        DeployError::Validation(err.to_string())
    }
}

impl From<BatchFailure> for DeployError {
    fn from(failure: BatchFailure) -> Self {
        DeployError::PartialBatchFailure(Box::new(failure))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Stage of `apply` at which a node failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Desired deployment failed validation
    Validate,
    /// Fetching the live deployment before planning
    Fetch,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Validate => write!(f, "validate"),
            Step::Fetch => write!(f, "fetch"),
            Step::Create => write!(f, "create"),
            Step::Update => write!(f, "update"),
            Step::Delete => write!(f, "delete"),
        }
    }
}

/// A node whose forward operation failed
#[derive(Debug)]
pub struct NodeFailure {
    pub node: NodeId,
    pub step: Step,
    pub error: DeployError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The node and its contract are back to their pre-batch state
    RolledBack,
    /// The inverse operation failed; manual reconciliation is required
    Failed(String),
    /// A deletion cannot be undone
    PermanentLoss { contract: ContractId },
}

/// Outcome of undoing one node's mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compensation {
    pub node: NodeId,
    pub outcome: CompensationOutcome,
}

/// Aggregate failure of one `apply` batch
#[derive(Debug, Error)]
pub struct BatchFailure {
    /// Node-contract map after best-effort compensation
    pub contracts: NodeContracts,
    pub failures: Vec<NodeFailure>,
    pub compensations: Vec<Compensation>,
    /// The caller cancelled the batch before it finished
    pub cancelled: bool,
}

impl BatchFailure {
    /// True when every compensation restored its node
    pub fn is_fully_rolled_back(&self) -> bool {
        self.compensations
            .iter()
            .all(|c| c.outcome == CompensationOutcome::RolledBack)
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.failures.iter().map(|f| f.node).collect()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self
            .failures
            .iter()
            .map(|n| format!("{} failed to {}: {}", n.node, n.step, n.error))
            .collect::<Vec<_>>()
            .join("; ");
        let unresolved = self
            .compensations
            .iter()
            .filter(|c| c.outcome != CompensationOutcome::RolledBack)
            .count();
        let outcome = if self.cancelled { "cancelled" } else { "failed" };
        if unresolved == 0 {
            write!(f, "Batch {} and was rolled back", outcome)?;
        } else {
            write!(
                f,
                "Batch {}, {} compensation(s) need manual reconciliation",
                outcome, unresolved
            )?;
        }
        if !failed.is_empty() {
            write!(f, ": {}", failed)?;
        }
        Ok(())
    }
}
