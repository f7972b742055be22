//! Node gateway trait
//!
//! The single capability interface the reconciliation engine talks to. It
//! has a live implementation over the message bus and an in-memory one.

use crate::error::{NodeError, Result};
use async_trait::async_trait;
use grid_types::{ContractId, Counters, Deployment, Dmi, PublicConfig, SystemVersion, Workload};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// Per-node RPC proxy
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Submit a new deployment. Its contract must already exist.
    async fn deploy(&self, deployment: &Deployment) -> Result<()>;

    /// Submit a new version of an existing deployment
    async fn update(&self, deployment: &Deployment) -> Result<()>;

    /// Fetch the live deployment bound to `contract`.
    ///
    /// A missing deployment is [`NodeError::NotFound`], never a default value.
    async fn get(&self, contract: ContractId) -> Result<Deployment>;

    /// Decommission the deployment; its workloads move to `deleted`
    async fn delete(&self, contract: ContractId) -> Result<()>;

    /// Wireguard ports already taken on the node
    async fn list_used_ports(&self) -> Result<Vec<u16>>;

    /// Interfaces and their addresses
    async fn list_interfaces(&self) -> Result<BTreeMap<String, Vec<IpAddr>>>;

    async fn get_public_config(&self) -> Result<PublicConfig>;

    async fn set_public_config(&self, config: &PublicConfig) -> Result<()>;

    /// History of workload changes for a deployment
    async fn list_workload_changes(&self, contract: ContractId) -> Result<Vec<Workload>>;

    async fn system_version(&self) -> Result<SystemVersion>;

    /// Total and used capacity
    async fn counters(&self) -> Result<Counters>;

    /// Public addresses the node can hand to workloads
    async fn list_public_ips(&self) -> Result<Vec<IpAddr>>;

    async fn system_dmi(&self) -> Result<Dmi>;

    /// Name of the hypervisor the node runs under, empty on bare metal
    async fn system_hypervisor(&self) -> Result<String>;

    /// Liveness check bounded by `timeout`
    async fn is_up(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.system_version()).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(NodeError::Timeout(timeout)),
        }
    }
}
