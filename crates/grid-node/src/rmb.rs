//! Node gateway over the message bus
//!
//! Each call is one request/response exchange with the twin operating the
//! node. Payloads and replies are JSON.

use crate::bus::MessageBus;
use crate::error::Result;
use crate::gateway::NodeGateway;
use async_trait::async_trait;
use grid_types::{
    ContractId, Counters, Deployment, Dmi, PublicConfig, SystemVersion, TwinId, Workload,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

pub const CMD_DEPLOY: &str = "zos.deployment.deploy";
pub const CMD_UPDATE: &str = "zos.deployment.update";
pub const CMD_GET: &str = "zos.deployment.get";
pub const CMD_DELETE: &str = "zos.deployment.delete";
pub const CMD_CHANGES: &str = "zos.deployment.changes";
pub const CMD_USED_PORTS: &str = "zos.network.list_wg_ports";
pub const CMD_INTERFACES: &str = "zos.network.interfaces";
pub const CMD_PUBLIC_CONFIG_GET: &str = "zos.network.public_config_get";
pub const CMD_PUBLIC_CONFIG_SET: &str = "zos.network.public_config_set";
pub const CMD_PUBLIC_IPS: &str = "zos.network.list_public_ips";
pub const CMD_SYSTEM_VERSION: &str = "zos.system.version";
pub const CMD_SYSTEM_DMI: &str = "zos.system.dmi";
pub const CMD_SYSTEM_HYPERVISOR: &str = "zos.system.hypervisor";
pub const CMD_STATISTICS: &str = "zos.statistics.get";

/// Node client bound to the twin that operates the node
#[derive(Clone)]
pub struct RmbNodeClient {
    twin: TwinId,
    bus: Arc<dyn MessageBus>,
}

impl RmbNodeClient {
    pub fn new(twin: TwinId, bus: Arc<dyn MessageBus>) -> Self {
        Self { twin, bus }
    }

    pub fn twin(&self) -> TwinId {
        self.twin
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, payload: serde_json::Value) -> Result<T> {
        debug!(twin = %self.twin, command, "Node call");
        let reply = self.bus.call(self.twin, command, payload).await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn send(&self, command: &str, payload: serde_json::Value) -> Result<()> {
        debug!(twin = %self.twin, command, "Node call");
        self.bus.call(self.twin, command, payload).await?;
        Ok(())
    }
}

fn contract_payload(contract: ContractId) -> serde_json::Value {
    json!({ "contract_id": contract })
}

#[async_trait]
impl NodeGateway for RmbNodeClient {
    async fn deploy(&self, deployment: &Deployment) -> Result<()> {
        self.send(CMD_DEPLOY, serde_json::to_value(deployment)?).await
    }

    async fn update(&self, deployment: &Deployment) -> Result<()> {
        self.send(CMD_UPDATE, serde_json::to_value(deployment)?).await
    }

    async fn get(&self, contract: ContractId) -> Result<Deployment> {
        self.call(CMD_GET, contract_payload(contract)).await
    }

    async fn delete(&self, contract: ContractId) -> Result<()> {
        self.send(CMD_DELETE, contract_payload(contract)).await
    }

    async fn list_used_ports(&self) -> Result<Vec<u16>> {
        self.call(CMD_USED_PORTS, serde_json::Value::Null).await
    }

    async fn list_interfaces(&self) -> Result<BTreeMap<String, Vec<IpAddr>>> {
        self.call(CMD_INTERFACES, serde_json::Value::Null).await
    }

    async fn get_public_config(&self) -> Result<PublicConfig> {
        self.call(CMD_PUBLIC_CONFIG_GET, serde_json::Value::Null).await
    }

    async fn set_public_config(&self, config: &PublicConfig) -> Result<()> {
        self.send(CMD_PUBLIC_CONFIG_SET, serde_json::to_value(config)?)
            .await
    }

    async fn list_workload_changes(&self, contract: ContractId) -> Result<Vec<Workload>> {
        self.call(CMD_CHANGES, contract_payload(contract)).await
    }

    async fn system_version(&self) -> Result<SystemVersion> {
        self.call(CMD_SYSTEM_VERSION, serde_json::Value::Null).await
    }

    async fn counters(&self) -> Result<Counters> {
        self.call(CMD_STATISTICS, serde_json::Value::Null).await
    }

    async fn list_public_ips(&self) -> Result<Vec<IpAddr>> {
        self.call(CMD_PUBLIC_IPS, serde_json::Value::Null).await
    }

    async fn system_dmi(&self) -> Result<Dmi> {
        self.call(CMD_SYSTEM_DMI, serde_json::Value::Null).await
    }

    async fn system_hypervisor(&self) -> Result<String> {
        self.call(CMD_SYSTEM_HYPERVISOR, serde_json::Value::Null).await
    }
}
