//! Deployment fingerprints
//!
//! A fingerprint is a blake3 digest over the caller-controlled content of a
//! deployment: owner, signature requests and the ordered workloads' name,
//! type, description and data. Versions, results, collected signatures and
//! the contract binding are bookkeeping and never contribute.

use crate::deployment::Deployment;
use serde::{Deserialize, Serialize};
use std::fmt;

const DOMAIN: &[u8] = b"grid-deployment-fingerprint-v1:";

/// Content digest of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the fingerprint of a deployment.
///
/// Every variable-length field is length-prefixed so that adjacent fields
/// cannot be shifted into each other.
pub fn fingerprint(deployment: &Deployment) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    hasher.update(&deployment.twin_id.value().to_le_bytes());

    let requirement = &deployment.signature_requirement;
    hasher.update(&requirement.weight_required.to_le_bytes());
    hasher.update(&(requirement.requests.len() as u64).to_le_bytes());
    for request in &requirement.requests {
        hasher.update(&request.twin_id.value().to_le_bytes());
        hasher.update(&[request.required as u8]);
        hasher.update(&request.weight.to_le_bytes());
    }

    hasher.update(&(deployment.workloads.len() as u64).to_le_bytes());
    for workload in &deployment.workloads {
        field(&mut hasher, workload.name.as_bytes());
        field(&mut hasher, workload.workload_type.tag().as_bytes());
        field(&mut hasher, workload.description.as_bytes());
        // serde_json::Value objects are key-sorted, so this is canonical.
        field(&mut hasher, workload.data.to_string().as_bytes());
    }

    Fingerprint(*hasher.finalize().as_bytes())
}

fn field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
