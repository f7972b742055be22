//! Node client pool - resolves node ids to gateways

use crate::error::{DeployError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use grid_ledger::ContractLedger;
use grid_node::{MessageBus, NodeGateway, RmbNodeClient};
use grid_types::NodeId;
use std::sync::Arc;
use tracing::debug;

/// Source of node gateways
#[async_trait]
pub trait NodeClientPool: Send + Sync {
    async fn client(&self, node: NodeId) -> Result<Arc<dyn NodeGateway>>;
}

/// Pool of bus clients. A node's twin is looked up on the ledger once and
/// the client cached.
pub struct RmbNodeClientPool {
    ledger: Arc<dyn ContractLedger>,
    bus: Arc<dyn MessageBus>,
    clients: DashMap<NodeId, Arc<RmbNodeClient>>,
}

impl RmbNodeClientPool {
    pub fn new(ledger: Arc<dyn ContractLedger>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            ledger,
            bus,
            clients: DashMap::new(),
        }
    }
}

#[async_trait]
impl NodeClientPool for RmbNodeClientPool {
    async fn client(&self, node: NodeId) -> Result<Arc<dyn NodeGateway>> {
        if let Some(cached) = self.clients.get(&node) {
            let client: Arc<dyn NodeGateway> = cached.value().clone();
            return Ok(client);
        }

        let info = self.ledger.get_node(node).await?;
        debug!(node = %node, twin = %info.twin_id, "Resolved node twin");
        let client = Arc::new(RmbNodeClient::new(info.twin_id, self.bus.clone()));
        self.clients.insert(node, client.clone());
        let client: Arc<dyn NodeGateway> = client;
        Ok(client)
    }
}

/// Fixed set of gateways, for tests and embedding
#[derive(Default)]
pub struct StaticNodePool {
    nodes: DashMap<NodeId, Arc<dyn NodeGateway>>,
}

impl StaticNodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: NodeId, gateway: Arc<dyn NodeGateway>) {
        self.nodes.insert(node, gateway);
    }

    pub fn with_node(self, node: NodeId, gateway: Arc<dyn NodeGateway>) -> Self {
        self.insert(node, gateway);
        self
    }
}

#[async_trait]
impl NodeClientPool for StaticNodePool {
    async fn client(&self, node: NodeId) -> Result<Arc<dyn NodeGateway>> {
        self.nodes
            .get(&node)
            .map(|g| g.clone())
            .ok_or_else(|| DeployError::NotFound(format!("no gateway for {}", node)))
    }
}
