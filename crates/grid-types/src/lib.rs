//! Grid Types - Core types for multi-node deployment reconciliation
//!
//! A grid deployment is a bundle of workloads (networks, machines, disks,
//! gateways, ...) submitted to a single node and authorized by a contract on
//! the ledger. This crate holds the vocabulary shared by the node gateway,
//! the ledger client and the reconciliation engine.
//!
//! ## Key Concepts
//!
//! - **Deployment**: the unit of remote state for one node
//! - **Workload**: one resource request inside a deployment
//! - **Fingerprint**: content digest ignoring version and result bookkeeping
//! - **Identity**: the twin that owns contracts and signs deployments
//! - **NodeContracts**: caller-held node → contract map

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod deployment;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod identity;
pub mod ids;
pub mod network;
pub mod workload;

// Re-export main types
pub use deployment::{Deployment, DeploymentSignature, SignatureRequest, SignatureRequirement};
pub use error::{Result, TypesError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use gateway::{GatewayNameProxyData, GatewayProxyResult};
pub use identity::Identity;
pub use ids::{ContractId, NodeContracts, NodeId, TwinId};
pub use network::{
    Capacity, Counters, Dmi, DmiSection, DmiSubSection, DmiTooling, IfaceType, IpNet, PublicConfig,
    SystemVersion,
};
pub use workload::{ResultState, Workload, WorkloadResult, WorkloadType};
