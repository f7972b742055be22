//! Gateway-name workload deployer
//!
//! Deploys a single `gateway-name-proxy` workload on one node. The name is
//! reserved on the ledger through a name contract before the node
//! deployment is applied, and released after the deployment is cancelled.

use crate::config::DeployerConfig;
use crate::error::{DeployError, Result};
use crate::deadline::within;
use crate::orchestrator::{Deployer, Reconciler};
use crate::planner::Deployments;
use crate::pool::NodeClientPool;
use crate::sync::sync_contracts;
use grid_ledger::ContractLedger;
use grid_types::{
    ContractId, Deployment, GatewayNameProxyData, GatewayProxyResult, Identity, NodeContracts,
    NodeId, ResultState, Workload, WorkloadType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// A gateway that proxies a registered name to a set of backends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayNameProxy {
    pub name: String,
    pub tls_passthrough: bool,
    pub backends: Vec<String>,
    pub description: String,
    /// Assigned by the node once the workload is up
    pub fqdn: String,
}

impl GatewayNameProxy {
    pub fn to_workload(&self) -> Result<Workload> {
        let data = GatewayNameProxyData {
            name: self.name.clone(),
            tls_passthrough: self.tls_passthrough,
            backends: self.backends.clone(),
        };
        let data = serde_json::to_value(data).map_err(|e| DeployError::Schema(e.to_string()))?;
        Ok(
            Workload::new(self.name.clone(), WorkloadType::GatewayNameProxy, data)
                .with_description(self.description.clone()),
        )
    }
}

/// Persisted state of a gateway-name deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayNameState {
    /// Empty until something is deployed
    pub id: String,
    pub node: NodeId,
    pub gw: GatewayNameProxy,
    pub node_deployment_id: NodeContracts,
    pub name_contract_id: ContractId,
}

impl GatewayNameState {
    pub fn new(node: NodeId, gw: GatewayNameProxy) -> Self {
        Self {
            id: String::new(),
            node,
            gw,
            node_deployment_id: NodeContracts::new(),
            name_contract_id: ContractId::UNSET,
        }
    }
}

pub struct GatewayNameDeployer {
    pub state: GatewayNameState,
    identity: Identity,
    ledger: Arc<dyn ContractLedger>,
    pool: Arc<dyn NodeClientPool>,
    deployer: Arc<dyn Deployer>,
    request_timeout: Duration,
}

impl GatewayNameDeployer {
    pub fn new(
        state: GatewayNameState,
        identity: Identity,
        ledger: Arc<dyn ContractLedger>,
        pool: Arc<dyn NodeClientPool>,
        deployer: Arc<dyn Deployer>,
        config: &DeployerConfig,
    ) -> Self {
        Self {
            state,
            identity,
            ledger,
            pool,
            deployer,
            request_timeout: config.request_timeout(),
        }
    }

    /// Share the reconciler's identity, ledger and node pool
    pub fn with_reconciler(
        state: GatewayNameState,
        reconciler: Arc<Reconciler>,
        config: &DeployerConfig,
    ) -> Self {
        let identity = reconciler.identity().clone();
        let ledger = reconciler.ledger().clone();
        let pool = reconciler.pool().clone();
        Self::new(state, identity, ledger, pool, reconciler, config)
    }

    /// Desired deployments without versions, keyed by node
    pub fn generate_versionless_deployments(&self) -> Result<Deployments> {
        let deployment =
            Deployment::new(self.identity.twin_id()).with_workload(self.state.gw.to_workload()?);
        Ok(Deployments::from([(self.state.node, deployment)]))
    }

    /// Check the owner's account, the gateway definition and that its node
    /// answers
    pub async fn validate(&self) -> Result<()> {
        let account = within(
            self.request_timeout,
            "get account",
            self.ledger.get_account(&self.identity),
        )
        .await?;
        if account.free == 0 {
            return Err(DeployError::Validation(format!(
                "account of {} has no free balance",
                self.identity.twin_id()
            )));
        }

        let gw = &self.state.gw;
        if gw.name.trim().is_empty() {
            return Err(DeployError::Validation("gateway name is empty".into()));
        }
        if gw.backends.is_empty() {
            return Err(DeployError::Validation(format!(
                "gateway {} has no backends",
                gw.name
            )));
        }

        let gateway = within(
            self.request_timeout,
            "resolve node",
            self.pool.client(self.state.node),
        )
        .await?;
        within(
            self.request_timeout,
            "list interfaces",
            gateway.list_interfaces(),
        )
        .await?;
        Ok(())
    }

    /// Point `name_contract_id` at an active reservation of the gateway
    /// name owned by this twin, creating one if needed
    async fn reserve_name(&mut self) -> Result<()> {
        let limit = self.request_timeout;
        let name = self.state.gw.name.clone();

        let reusable = within(
            limit,
            "check name contract",
            self.ledger
                .invalidate_name_contract(&self.identity, self.state.name_contract_id, &name),
        )
        .await?;
        if !reusable.is_unset() {
            self.state.name_contract_id = reusable;
            return Ok(());
        }

        // The name may already be ours from a deploy whose state was lost
        let lookup = within(
            limit,
            "find name contract",
            self.ledger.get_contract_id_by_name(&name),
        )
        .await;
        match lookup {
            Ok(existing) => {
                let found =
                    within(limit, "get contract", self.ledger.get_contract(existing)).await?;
                if found.twin_id != self.identity.twin_id() {
                    return Err(DeployError::LedgerRejected(format!(
                        "name {} is reserved by {}",
                        name, found.twin_id
                    )));
                }
                if found.is_active() {
                    info!(contract = %existing, "Adopted existing name reservation");
                    self.state.name_contract_id = existing;
                    return Ok(());
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let created = within(
            limit,
            "create name contract",
            self.ledger.create_name_contract(&self.identity, &name),
        )
        .await?;
        info!(contract = %created, "Reserved gateway name");
        self.state.name_contract_id = created;
        Ok(())
    }

    fn refresh_id(&mut self) {
        self.state.id = self
            .state
            .node_deployment_id
            .get(&self.state.node)
            .map(|contract| contract.value().to_string())
            .unwrap_or_default();
    }

    /// Reserve the name and apply the gateway deployment.
    ///
    /// The node-contract map follows the outcome of `apply` even when it
    /// fails.
    #[instrument(skip(self), fields(node = %self.state.node, name = %self.state.gw.name))]
    pub async fn deploy(&mut self) -> Result<()> {
        self.validate().await?;
        let desired = self.generate_versionless_deployments()?;

        self.reserve_name().await?;

        let applied = self
            .deployer
            .apply(&self.state.node_deployment_id, &desired)
            .await;
        match applied {
            Ok(contracts) => {
                self.state.node_deployment_id = contracts;
                self.refresh_id();
            }
            Err(failure) => {
                self.state.node_deployment_id = failure.contracts.clone();
                self.refresh_id();
                return Err(failure.into());
            }
        }

        self.sync().await
    }

    /// Remove the deployment, then release the name. The name contract is
    /// kept when releasing it fails.
    #[instrument(skip(self), fields(node = %self.state.node, name = %self.state.gw.name))]
    pub async fn cancel(&mut self) -> Result<()> {
        let applied = self
            .deployer
            .apply(&self.state.node_deployment_id, &Deployments::new())
            .await;
        match applied {
            Ok(contracts) => self.state.node_deployment_id = contracts,
            Err(failure) => {
                self.state.node_deployment_id = failure.contracts.clone();
                return Err(failure.into());
            }
        }

        within(
            self.request_timeout,
            "cancel name contract",
            self.ledger
                .ensure_contract_canceled(&self.identity, self.state.name_contract_id),
        )
        .await?;
        info!(contract = %self.state.name_contract_id, "Released gateway name");
        self.state.name_contract_id = ContractId::UNSET;
        self.refresh_id();
        Ok(())
    }

    /// Forget contracts the ledger no longer knows as valid
    pub async fn sync_contracts(&mut self) -> Result<()> {
        sync_contracts(
            self.ledger.as_ref(),
            &mut self.state.node_deployment_id,
            self.request_timeout,
        )
        .await?;
        let name_valid = within(
            self.request_timeout,
            "check name contract",
            self.ledger.is_valid_contract(self.state.name_contract_id),
        )
        .await?;
        if !name_valid {
            self.state.name_contract_id = ContractId::UNSET;
        }
        if self.state.node_deployment_id.is_empty() && self.state.name_contract_id.is_unset() {
            self.state.id.clear();
        }
        Ok(())
    }

    /// Refresh contracts and the gateway's FQDN from the node.
    ///
    /// A workload that is gone from the node clears the gateway.
    pub async fn sync(&mut self) -> Result<()> {
        self.sync_contracts().await?;
        if !self.state.node_deployment_id.contains_key(&self.state.node) {
            self.state.gw = GatewayNameProxy::default();
            return Ok(());
        }

        let mut view = self.generate_versionless_deployments()?;
        self.deployer
            .sync(&mut self.state.node_deployment_id, &mut view)
            .await?;

        let synced = view
            .get(&self.state.node)
            .and_then(|deployment| deployment.get(&self.state.gw.name));
        match synced {
            Some(workload) if workload.result.state == ResultState::Ok => {
                let result: GatewayProxyResult =
                    serde_json::from_value(workload.result.data.clone())
                        .map_err(|e| DeployError::Schema(e.to_string()))?;
                self.state.gw.fqdn = result.fqdn;
            }
            Some(_) => {}
            None => {
                info!(name = %self.state.gw.name, "Gateway workload gone, clearing");
                self.state.gw = GatewayNameProxy::default();
            }
        }
        Ok(())
    }
}
