//! Deployments - the unit of remote state for one node

use crate::error::{Result, TypesError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::identity::Identity;
use crate::ids::{ContractId, TwinId};
use crate::workload::{ResultState, Workload, WorkloadType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A twin whose signature is requested, with its weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub twin_id: TwinId,
    #[serde(default)]
    pub required: bool,
    pub weight: u32,
}

/// A collected signature over the deployment fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSignature {
    pub twin_id: TwinId,
    /// Hex encoded ed25519 signature
    pub signature: String,
    pub signature_type: String,
}

/// Which twins must sign a deployment before a node accepts it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequirement {
    pub requests: Vec<SignatureRequest>,
    pub weight_required: u32,
    #[serde(default)]
    pub signatures: Vec<DeploymentSignature>,
}

impl SignatureRequirement {
    /// A single twin with full weight.
    pub fn single(twin_id: TwinId) -> Self {
        Self {
            requests: vec![SignatureRequest {
                twin_id,
                required: false,
                weight: 1,
            }],
            weight_required: 1,
            signatures: Vec::new(),
        }
    }
}

/// Desired (or live) state of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Monotonically increasing on every accepted change
    #[serde(default)]
    pub version: u32,

    /// Owner
    pub twin_id: TwinId,

    /// Ledger contract authorizing this deployment
    #[serde(default)]
    pub contract_id: ContractId,

    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub description: String,

    pub signature_requirement: SignatureRequirement,

    /// Insertion order is part of the deployment's identity
    pub workloads: Vec<Workload>,
}

impl Deployment {
    /// Create an empty, version-less deployment owned and signed by `twin_id`
    pub fn new(twin_id: TwinId) -> Self {
        Self {
            version: 0,
            twin_id,
            contract_id: ContractId::UNSET,
            metadata: String::new(),
            description: String::new(),
            signature_requirement: SignatureRequirement::single(twin_id),
            workloads: Vec::new(),
        }
    }

    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workloads.push(workload);
        self
    }

    /// Check structural invariants: names are non-empty and unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.workloads.len());
        for workload in &self.workloads {
            if workload.name.trim().is_empty() {
                return Err(TypesError::InvalidWorkloadName(workload.name.clone()));
            }
            if !seen.insert(workload.name.as_str()) {
                return Err(TypesError::DuplicateWorkloadName(workload.name.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Workload> {
        self.workloads.iter_mut().find(|w| w.name == name)
    }

    /// The logical workload set: everything not reported as deleted.
    pub fn active(&self) -> Deployment {
        let mut view = self.clone();
        view.workloads.retain(|w| !w.is_deleted());
        view
    }

    /// Number of public ips the contract must reserve
    pub fn public_ip_count(&self) -> u32 {
        self.workloads
            .iter()
            .filter(|w| w.workload_type == WorkloadType::PublicIp && !w.is_deleted())
            .count() as u32
    }

    /// True when every workload is in the given state
    pub fn all_in_state(&self, state: ResultState) -> bool {
        self.workloads.iter().all(|w| w.result.state == state)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self)
    }

    /// Sign the current fingerprint, replacing any earlier signature of the
    /// same twin.
    pub fn sign(&mut self, identity: &Identity) -> Fingerprint {
        let hash = self.fingerprint();
        let signature = identity.sign(&hash);
        let signatures = &mut self.signature_requirement.signatures;
        signatures.retain(|s| s.twin_id != identity.twin_id());
        signatures.push(signature);
        hash
    }
}
