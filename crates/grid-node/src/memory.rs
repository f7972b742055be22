//! In-memory node gateway
//!
//! Behaves like a well-formed node: deployments are held per contract,
//! accepted workloads report `ok` and decommissioned ones report `deleted`.
//! Failures can be injected per operation to exercise partial-failure paths.

use crate::error::{NodeError, Result};
use crate::gateway::NodeGateway;
use async_trait::async_trait;
use dashmap::DashMap;
use grid_types::{
    ContractId, Counters, Deployment, Dmi, GatewayProxyResult, PublicConfig, ResultState,
    SystemVersion, Workload, WorkloadResult, WorkloadType,
};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Gateway operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOp {
    Deploy,
    Update,
    Get,
    Delete,
    /// Status queries (version, statistics, interfaces, public config, ports)
    Status,
}

/// In-memory node
pub struct InMemoryNodeGateway {
    deployments: DashMap<ContractId, Deployment>,
    changes: DashMap<ContractId, Vec<Workload>>,
    public_config: RwLock<PublicConfig>,
    interfaces: RwLock<BTreeMap<String, Vec<IpAddr>>>,
    used_ports: RwLock<Vec<u16>>,
    public_ips: Vec<IpAddr>,
    counters: RwLock<Counters>,
    version: SystemVersion,
    dmi: Dmi,
    hypervisor: String,
    failing: DashMap<NodeOp, NodeError>,
    delays: DashMap<NodeOp, Duration>,
    writes: AtomicUsize,
}

impl InMemoryNodeGateway {
    pub fn new() -> Self {
        Self {
            deployments: DashMap::new(),
            changes: DashMap::new(),
            public_config: RwLock::new(PublicConfig::default()),
            interfaces: RwLock::new(BTreeMap::new()),
            used_ports: RwLock::new(Vec::new()),
            public_ips: Vec::new(),
            counters: RwLock::new(Counters::default()),
            version: SystemVersion {
                zos: "v3.0.0".to_string(),
                zinit: "v0.2.0".to_string(),
            },
            dmi: Dmi::default(),
            hypervisor: String::new(),
            failing: DashMap::new(),
            delays: DashMap::new(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_public_config(self, config: PublicConfig) -> Self {
        Self {
            public_config: RwLock::new(config),
            ..self
        }
    }

    pub fn with_interface(mut self, name: impl Into<String>, ips: Vec<IpAddr>) -> Self {
        self.interfaces.get_mut().insert(name.into(), ips);
        self
    }

    pub fn with_used_ports(self, ports: Vec<u16>) -> Self {
        Self {
            used_ports: RwLock::new(ports),
            ..self
        }
    }

    pub fn with_public_ips(self, public_ips: Vec<IpAddr>) -> Self {
        Self { public_ips, ..self }
    }

    pub fn with_counters(self, counters: Counters) -> Self {
        Self {
            counters: RwLock::new(counters),
            ..self
        }
    }

    pub fn with_hypervisor(self, hypervisor: impl Into<String>) -> Self {
        Self {
            hypervisor: hypervisor.into(),
            ..self
        }
    }

    pub fn with_dmi(self, dmi: Dmi) -> Self {
        Self { dmi, ..self }
    }

    /// Hold every call of `op` for `delay` before answering
    pub fn slow_down(&self, op: NodeOp, delay: Duration) {
        self.delays.insert(op, delay);
    }

    pub fn speed_up(&self, op: NodeOp) {
        self.delays.remove(&op);
    }

    /// Make every call of `op` fail with `error` until [`heal`](Self::heal)
    pub fn fail(&self, op: NodeOp, error: NodeError) {
        self.failing.insert(op, error);
    }

    pub fn heal(&self, op: NodeOp) {
        self.failing.remove(&op);
    }

    /// Take the node off the bus entirely
    pub fn go_down(&self) {
        for op in [
            NodeOp::Deploy,
            NodeOp::Update,
            NodeOp::Get,
            NodeOp::Delete,
            NodeOp::Status,
        ] {
            self.fail(op, NodeError::Unreachable("node is offline".to_string()));
        }
    }

    pub fn come_up(&self) {
        self.failing.clear();
    }

    /// Place a deployment on the node as-is, bypassing validation
    pub fn insert(&self, deployment: Deployment) {
        self.deployments.insert(deployment.contract_id, deployment);
    }

    /// Lose a deployment as a node wiped out of band would
    pub fn forget(&self, contract: ContractId) {
        self.deployments.remove(&contract);
    }

    /// Inspect the stored deployment without going through failure injection
    pub fn deployment(&self, contract: ContractId) -> Option<Deployment> {
        self.deployments.get(&contract).map(|d| d.clone())
    }

    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    /// Number of accepted deploy, update and delete calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn check(&self, op: NodeOp) -> Result<()> {
        let delay = self.delays.get(&op).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failing.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn admit(deployment: &Deployment) -> Result<()> {
        deployment
            .validate()
            .map_err(|e| NodeError::Rejected(e.to_string()))?;
        if deployment.contract_id.is_unset() {
            return Err(NodeError::Rejected("deployment has no contract".to_string()));
        }
        if deployment.signature_requirement.signatures.is_empty() {
            return Err(NodeError::Rejected("deployment is not signed".to_string()));
        }
        Ok(())
    }

    async fn settle(&self, deployment: &mut Deployment) {
        let domain = self.public_config.read().await.domain.clone();
        for workload in deployment.workloads.iter_mut() {
            if workload.is_deleted() {
                continue;
            }
            let mut result = WorkloadResult::with_state(ResultState::Ok);
            if workload.workload_type == WorkloadType::GatewayNameProxy {
                if let Some(name) = workload.data.get("name").and_then(|v| v.as_str()) {
                    let fqdn = GatewayProxyResult {
                        fqdn: format!("{}.{}", name, domain),
                    };
                    result.data = serde_json::to_value(fqdn).unwrap_or_default();
                }
            }
            workload.result = result;
        }
    }

    fn record_changes(&self, deployment: &Deployment) {
        let changed = deployment
            .workloads
            .iter()
            .filter(|w| w.version == deployment.version)
            .cloned();
        self.changes
            .entry(deployment.contract_id)
            .or_default()
            .extend(changed);
    }
}

impl Default for InMemoryNodeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeGateway for InMemoryNodeGateway {
    async fn deploy(&self, deployment: &Deployment) -> Result<()> {
        self.check(NodeOp::Deploy).await?;
        Self::admit(deployment)?;
        if self.deployments.contains_key(&deployment.contract_id) {
            return Err(NodeError::Rejected(format!(
                "deployment for {} already exists",
                deployment.contract_id
            )));
        }

        let mut stored = deployment.clone();
        self.settle(&mut stored).await;
        self.record_changes(&stored);
        self.deployments.insert(stored.contract_id, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, deployment: &Deployment) -> Result<()> {
        self.check(NodeOp::Update).await?;
        Self::admit(deployment)?;
        let current_version = self
            .deployments
            .get(&deployment.contract_id)
            .map(|d| d.version)
            .ok_or_else(|| {
                NodeError::NotFound(format!("deployment for {}", deployment.contract_id))
            })?;
        if deployment.version <= current_version {
            return Err(NodeError::Rejected(format!(
                "version {} is not newer than {}",
                deployment.version, current_version
            )));
        }

        let mut stored = deployment.clone();
        self.settle(&mut stored).await;
        self.record_changes(&stored);
        self.deployments.insert(stored.contract_id, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, contract: ContractId) -> Result<Deployment> {
        self.check(NodeOp::Get).await?;
        self.deployments
            .get(&contract)
            .map(|d| d.clone())
            .ok_or_else(|| NodeError::NotFound(format!("deployment for {}", contract)))
    }

    async fn delete(&self, contract: ContractId) -> Result<()> {
        self.check(NodeOp::Delete).await?;
        let mut entry = self
            .deployments
            .get_mut(&contract)
            .ok_or_else(|| NodeError::NotFound(format!("deployment for {}", contract)))?;
        for workload in entry.workloads.iter_mut() {
            workload.result = WorkloadResult::with_state(ResultState::Deleted);
        }
        drop(entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_used_ports(&self) -> Result<Vec<u16>> {
        self.check(NodeOp::Status).await?;
        Ok(self.used_ports.read().await.clone())
    }

    async fn list_interfaces(&self) -> Result<BTreeMap<String, Vec<IpAddr>>> {
        self.check(NodeOp::Status).await?;
        Ok(self.interfaces.read().await.clone())
    }

    async fn get_public_config(&self) -> Result<PublicConfig> {
        self.check(NodeOp::Status).await?;
        Ok(self.public_config.read().await.clone())
    }

    async fn set_public_config(&self, config: &PublicConfig) -> Result<()> {
        self.check(NodeOp::Status).await?;
        *self.public_config.write().await = config.clone();
        Ok(())
    }

    async fn list_workload_changes(&self, contract: ContractId) -> Result<Vec<Workload>> {
        self.check(NodeOp::Status).await?;
        self.changes
            .get(&contract)
            .map(|c| c.clone())
            .ok_or_else(|| NodeError::NotFound(format!("deployment for {}", contract)))
    }

    async fn system_version(&self) -> Result<SystemVersion> {
        self.check(NodeOp::Status).await?;
        Ok(self.version.clone())
    }

    async fn counters(&self) -> Result<Counters> {
        self.check(NodeOp::Status).await?;
        Ok(*self.counters.read().await)
    }

    async fn list_public_ips(&self) -> Result<Vec<IpAddr>> {
        self.check(NodeOp::Status).await?;
        Ok(self.public_ips.clone())
    }

    async fn system_dmi(&self) -> Result<Dmi> {
        self.check(NodeOp::Status).await?;
        Ok(self.dmi.clone())
    }

    async fn system_hypervisor(&self) -> Result<String> {
        self.check(NodeOp::Status).await?;
        Ok(self.hypervisor.clone())
    }
}
