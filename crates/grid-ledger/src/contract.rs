//! Contract records as the ledger stores them

use grid_types::{ContractId, Fingerprint, NodeId, TwinId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractState {
    Created,
    Deleted,
}

/// What a contract reserves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContractKind {
    /// Capacity on a node, bound to a deployment fingerprint
    Node {
        node_id: NodeId,
        deployment_hash: Fingerprint,
        public_ips: u32,
    },
    /// A gateway name reservation
    Name { name: String },
}

/// A ledger contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub twin_id: TwinId,
    pub state: ContractState,
    pub kind: ContractKind,
}

impl Contract {
    pub fn is_active(&self) -> bool {
        self.state == ContractState::Created
    }

    /// Recorded fingerprint, for node contracts
    pub fn deployment_hash(&self) -> Option<&Fingerprint> {
        match &self.kind {
            ContractKind::Node {
                deployment_hash, ..
            } => Some(deployment_hash),
            ContractKind::Name { .. } => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ContractKind::Name { name } => Some(name),
            ContractKind::Node { .. } => None,
        }
    }
}

/// Registration of a node on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    /// Twin operating the node; its bus address
    pub twin_id: TwinId,
}

/// Balance of the account behind an identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub free: u128,
    pub reserved: u128,
}

/// A twin as registered on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinInfo {
    pub twin_id: TwinId,
    /// ed25519 public key of the account owning the twin
    pub public_key: [u8; 32],
}
