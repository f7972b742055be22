//! Reconciliation orchestrator
//!
//! `apply` runs the plan in three buckets, always in the order create,
//! update, delete. Calls to distinct nodes inside a bucket run concurrently
//! and each reports into its own result slot. When any node of a bucket
//! fails, later buckets are skipped and every node already mutated by this
//! call is compensated:
//!
//! - a created deployment is deleted and its contract cancelled
//! - an updated deployment is resubmitted with its pre-call content, at a
//!   newer version
//! - a deleted deployment cannot be restored and is reported as a
//!   permanent loss
//!
//! Every remote call, node resolution included, runs under a deadline:
//! `request_timeout` going forward, `compensation_timeout` while undoing.
//!
//! The engine keeps no state between calls; the caller owns the
//! node-contract map and serializes batches over it.

use crate::config::DeployerConfig;
use crate::deadline::within;
use crate::error::{
    BatchFailure, Compensation, CompensationOutcome, DeployError, NodeFailure, Result, Step,
};
use crate::liveness;
use crate::planner::{plan, Deployments};
use crate::pool::NodeClientPool;
use crate::sync::{merge_results, sync_contracts};
use crate::version::assign_versions;
use async_trait::async_trait;
use futures::future::join_all;
use grid_ledger::ContractLedger;
use grid_node::NodeGateway;
use grid_types::{ContractId, Deployment, Identity, NodeContracts, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Entry point used by workload-kind deployers
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Converge the nodes in `contracts` and `desired` to `desired`.
    ///
    /// Returns the new node-contract map, or the post-compensation map
    /// together with the fate of every node.
    async fn apply(
        &self,
        contracts: &NodeContracts,
        desired: &Deployments,
    ) -> std::result::Result<NodeContracts, BatchFailure>;

    /// Drop invalid contracts from `contracts` and merge live workload
    /// results into `view`. Nodes whose deployment is gone leave `view`.
    async fn sync(&self, contracts: &mut NodeContracts, view: &mut Deployments) -> Result<()>;
}

/// A change made to one node during the current batch
#[derive(Debug)]
enum Mutation {
    Created {
        node: NodeId,
        contract: ContractId,
    },
    Updated {
        node: NodeId,
        contract: ContractId,
        previous: Deployment,
        submitted: Deployment,
    },
    Deleted {
        node: NodeId,
        contract: ContractId,
    },
}

/// Effect of a node's step on the node-contract map
#[derive(Debug, Clone, Copy)]
enum MapEdit {
    Keep,
    Set(ContractId),
    Remove,
}

/// Result slot of one node's forward step
struct Forward {
    mutation: Option<Mutation>,
    failure: Option<NodeFailure>,
    /// Undo of the node's own half-applied step
    cleanup: Option<Compensation>,
    edit: (NodeId, MapEdit),
}

impl Forward {
    fn done(node: NodeId, mutation: Mutation, edit: MapEdit) -> Self {
        Self {
            mutation: Some(mutation),
            failure: None,
            cleanup: None,
            edit: (node, edit),
        }
    }

    fn failed(node: NodeId, step: Step, error: DeployError) -> Self {
        Self {
            mutation: None,
            failure: Some(NodeFailure { node, step, error }),
            cleanup: None,
            edit: (node, MapEdit::Keep),
        }
    }
}

/// Accumulated state of one `apply` call
struct Batch {
    contracts: NodeContracts,
    mutations: Vec<Mutation>,
    failures: Vec<NodeFailure>,
    compensations: Vec<Compensation>,
    cancelled: bool,
}

impl Batch {
    fn new(contracts: NodeContracts) -> Self {
        Self {
            contracts,
            mutations: Vec::new(),
            failures: Vec::new(),
            compensations: Vec::new(),
            cancelled: false,
        }
    }

    fn edit(&mut self, (node, edit): (NodeId, MapEdit)) {
        match edit {
            MapEdit::Keep => {}
            MapEdit::Set(contract) => {
                self.contracts.insert(node, contract);
            }
            MapEdit::Remove => {
                self.contracts.remove(&node);
            }
        }
    }

    /// Fold a bucket's slots in; true when any node failed
    fn absorb(&mut self, slots: Vec<Forward>) -> bool {
        for slot in slots {
            self.edit(slot.edit);
            self.mutations.extend(slot.mutation);
            self.failures.extend(slot.failure);
            self.compensations.extend(slot.cleanup);
        }
        !self.failures.is_empty()
    }

    fn into_failure(self) -> BatchFailure {
        BatchFailure {
            contracts: self.contracts,
            failures: self.failures,
            compensations: self.compensations,
            cancelled: self.cancelled,
        }
    }
}

/// Reconciliation engine over a contract ledger and a pool of nodes
pub struct Reconciler {
    identity: Identity,
    ledger: Arc<dyn ContractLedger>,
    pool: Arc<dyn NodeClientPool>,
    request_timeout: Duration,
    compensation_timeout: Duration,
    liveness_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        identity: Identity,
        ledger: Arc<dyn ContractLedger>,
        pool: Arc<dyn NodeClientPool>,
        config: &DeployerConfig,
    ) -> Self {
        Self {
            identity,
            ledger,
            pool,
            request_timeout: config.request_timeout(),
            compensation_timeout: config.compensation_timeout(),
            liveness_timeout: config.liveness_timeout(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn ledger(&self) -> &Arc<dyn ContractLedger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<dyn NodeClientPool> {
        &self.pool
    }

    /// Check every node concurrently with the configured liveness deadline
    pub async fn are_nodes_up(&self, nodes: &[NodeId]) -> Result<()> {
        liveness::are_nodes_up(self.pool.as_ref(), nodes, self.liveness_timeout).await
    }

    async fn gateway(&self, node: NodeId, limit: Duration) -> Result<Arc<dyn NodeGateway>> {
        within(limit, "resolve node", self.pool.client(node)).await
    }

    async fn get_deployment(
        &self,
        node: NodeId,
        contract: ContractId,
        limit: Duration,
    ) -> Result<Deployment> {
        let gateway = self.gateway(node, limit).await?;
        within(limit, "get deployment", gateway.get(contract)).await
    }

    /// Live deployments of every desired node that already has a contract
    async fn fetch_live(
        &self,
        contracts: &NodeContracts,
        desired: &Deployments,
    ) -> std::result::Result<Deployments, Vec<NodeFailure>> {
        let fetches = desired
            .keys()
            .filter_map(|node| contracts.get(node).map(|contract| (*node, *contract)))
            .map(move |(node, contract)| async move {
                let outcome = self
                    .get_deployment(node, contract, self.request_timeout)
                    .await;
                (node, outcome)
            });

        let mut live = Deployments::new();
        let mut failures = Vec::new();
        for (node, outcome) in join_all(fetches).await {
            match outcome {
                Ok(deployment) => {
                    live.insert(node, deployment);
                }
                Err(error) => failures.push(NodeFailure {
                    node,
                    step: Step::Fetch,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(live)
        } else {
            Err(failures)
        }
    }

    #[instrument(skip(self, desired), fields(node = %node))]
    async fn create_node(&self, node: NodeId, desired: &Deployment) -> Forward {
        let mut deployment = match assign_versions(None, desired) {
            Ok(deployment) => deployment,
            Err(error) => return Forward::failed(node, Step::Create, error),
        };
        let hash = deployment.sign(&self.identity);

        let gateway = match self.gateway(node, self.request_timeout).await {
            Ok(gateway) => gateway,
            Err(error) => return Forward::failed(node, Step::Create, error),
        };

        let created = within(
            self.request_timeout,
            "create contract",
            self.ledger.create_node_contract(
                &self.identity,
                node,
                &hash,
                deployment.public_ip_count(),
            ),
        )
        .await;
        let contract = match created {
            Ok(contract) => contract,
            Err(error) => return Forward::failed(node, Step::Create, error),
        };
        info!(contract = %contract, hash = %hash, "Created node contract");

        deployment.contract_id = contract;
        match within(self.request_timeout, "deploy", gateway.deploy(&deployment)).await {
            Ok(()) => {
                info!(contract = %contract, version = deployment.version, "Deployed");
                Forward::done(
                    node,
                    Mutation::Created { node, contract },
                    MapEdit::Set(contract),
                )
            }
            Err(error) => {
                warn!(contract = %contract, error = %error, "Deploy failed, cancelling contract");
                let cancelled = within(
                    self.compensation_timeout,
                    "cancel contract",
                    self.ledger.cancel_contract(&self.identity, contract),
                )
                .await;
                // A contract that could not be cancelled stays in the map
                let (outcome, edit) = match cancelled {
                    Ok(()) => (CompensationOutcome::RolledBack, MapEdit::Keep),
                    Err(e) => (
                        CompensationOutcome::Failed(format!("cancel {}: {}", contract, e)),
                        MapEdit::Set(contract),
                    ),
                };
                Forward {
                    mutation: None,
                    failure: Some(NodeFailure {
                        node,
                        step: Step::Create,
                        error,
                    }),
                    cleanup: Some(Compensation { node, outcome }),
                    edit: (node, edit),
                }
            }
        }
    }

    #[instrument(skip(self, live, desired), fields(node = %node, contract = %contract))]
    async fn update_node(
        &self,
        node: NodeId,
        contract: ContractId,
        live: &Deployment,
        desired: &Deployment,
    ) -> Forward {
        let mut deployment = match assign_versions(Some(live), desired) {
            Ok(deployment) => deployment,
            Err(error) => return Forward::failed(node, Step::Update, error),
        };
        deployment.contract_id = contract;
        let hash = deployment.sign(&self.identity);

        let gateway = match self.gateway(node, self.request_timeout).await {
            Ok(gateway) => gateway,
            Err(error) => return Forward::failed(node, Step::Update, error),
        };

        let recorded = within(
            self.request_timeout,
            "update contract",
            self.ledger
                .update_node_contract(&self.identity, contract, &hash),
        )
        .await;
        if let Err(error) = recorded {
            return Forward::failed(node, Step::Update, error);
        }

        match within(self.request_timeout, "update", gateway.update(&deployment)).await {
            Ok(()) => {
                info!(version = deployment.version, hash = %hash, "Updated");
                Forward::done(
                    node,
                    Mutation::Updated {
                        node,
                        contract,
                        previous: live.clone(),
                        submitted: deployment,
                    },
                    MapEdit::Keep,
                )
            }
            Err(error) => {
                warn!(error = %error, "Update failed, restoring contract hash");
                let restored = within(
                    self.compensation_timeout,
                    "restore contract",
                    self.ledger
                        .update_node_contract(&self.identity, contract, &live.fingerprint()),
                )
                .await;
                let outcome = match restored {
                    Ok(_) => CompensationOutcome::RolledBack,
                    Err(e) => CompensationOutcome::Failed(format!(
                        "restore hash of {}: {}",
                        contract, e
                    )),
                };
                Forward {
                    mutation: None,
                    failure: Some(NodeFailure {
                        node,
                        step: Step::Update,
                        error,
                    }),
                    cleanup: Some(Compensation { node, outcome }),
                    edit: (node, MapEdit::Keep),
                }
            }
        }
    }

    #[instrument(skip(self), fields(node = %node, contract = %contract))]
    async fn delete_node(&self, node: NodeId, contract: ContractId) -> Forward {
        let gateway = match self.gateway(node, self.request_timeout).await {
            Ok(gateway) => gateway,
            Err(error) => return Forward::failed(node, Step::Delete, error),
        };

        let destroyed = match within(self.request_timeout, "delete", gateway.delete(contract)).await
        {
            Ok(()) => {
                info!("Deleted deployment");
                true
            }
            Err(error) if error.is_not_found() => {
                debug!("Deployment already gone");
                false
            }
            Err(error) => return Forward::failed(node, Step::Delete, error),
        };
        let mutation = destroyed.then_some(Mutation::Deleted { node, contract });

        let cancelled = within(
            self.request_timeout,
            "cancel contract",
            self.ledger.ensure_contract_canceled(&self.identity, contract),
        )
        .await;
        match cancelled {
            Ok(()) => {
                info!("Cancelled contract");
                Forward {
                    mutation,
                    failure: None,
                    cleanup: None,
                    edit: (node, MapEdit::Remove),
                }
            }
            // Deployment is gone but the contract is not; keep it mapped
            Err(error) => Forward {
                mutation,
                failure: Some(NodeFailure {
                    node,
                    step: Step::Delete,
                    error,
                }),
                cleanup: None,
                edit: (node, MapEdit::Keep),
            },
        }
    }

    /// Undo every mutation of the batch concurrently
    async fn compensate(&self, mut batch: Batch) -> BatchFailure {
        let mutations = std::mem::take(&mut batch.mutations);
        warn!(
            failed = batch.failures.len(),
            to_undo = mutations.len(),
            "Compensating batch"
        );

        let undone = join_all(mutations.into_iter().map(|m| self.undo(m))).await;
        for (compensation, edit) in undone {
            batch.edit(edit);
            batch.compensations.push(compensation);
        }
        batch.into_failure()
    }

    async fn undo(&self, mutation: Mutation) -> (Compensation, (NodeId, MapEdit)) {
        match mutation {
            Mutation::Created { node, contract } => {
                let result: Result<()> = async {
                    let gateway = self.gateway(node, self.compensation_timeout).await?;
                    match within(self.compensation_timeout, "delete", gateway.delete(contract))
                        .await
                    {
                        Err(e) if !e.is_not_found() => return Err(e),
                        _ => {}
                    }
                    within(
                        self.compensation_timeout,
                        "cancel contract",
                        self.ledger.ensure_contract_canceled(&self.identity, contract),
                    )
                    .await
                }
                .await;
                match result {
                    Ok(()) => {
                        info!(node = %node, contract = %contract, "Rolled back create");
                        (
                            Compensation {
                                node,
                                outcome: CompensationOutcome::RolledBack,
                            },
                            (node, MapEdit::Remove),
                        )
                    }
                    Err(e) => {
                        warn!(node = %node, contract = %contract, error = %e, "Failed to roll back create");
                        (
                            Compensation {
                                node,
                                outcome: CompensationOutcome::Failed(e.to_string()),
                            },
                            (node, MapEdit::Keep),
                        )
                    }
                }
            }
            Mutation::Updated {
                node,
                contract,
                previous,
                submitted,
            } => {
                let result: Result<u32> = async {
                    // Content goes back, the version keeps moving forward
                    let mut revert = assign_versions(Some(&submitted), &previous.active())?;
                    revert.contract_id = contract;
                    let hash = revert.sign(&self.identity);

                    let gateway = self.gateway(node, self.compensation_timeout).await?;
                    within(
                        self.compensation_timeout,
                        "update contract",
                        self.ledger
                            .update_node_contract(&self.identity, contract, &hash),
                    )
                    .await?;
                    within(self.compensation_timeout, "update", gateway.update(&revert)).await?;
                    Ok(revert.version)
                }
                .await;
                let outcome = match result {
                    Ok(version) => {
                        info!(node = %node, version, "Rolled back update");
                        CompensationOutcome::RolledBack
                    }
                    Err(e) => {
                        warn!(node = %node, error = %e, "Failed to roll back update");
                        CompensationOutcome::Failed(e.to_string())
                    }
                };
                (Compensation { node, outcome }, (node, MapEdit::Keep))
            }
            Mutation::Deleted { node, contract } => {
                warn!(node = %node, contract = %contract, "Deleted deployment cannot be restored");
                (
                    Compensation {
                        node,
                        outcome: CompensationOutcome::PermanentLoss { contract },
                    },
                    (node, MapEdit::Keep),
                )
            }
        }
    }

    /// [`Deployer::apply`] that stops early once `cancel` fires.
    ///
    /// Cancellation is honored between buckets: calls already in flight
    /// finish, each under its own deadline, then every node mutated so far
    /// is compensated and the failure is marked cancelled. Dropping the
    /// returned future instead abandons compensation.
    #[instrument(skip_all, fields(desired = desired.len(), contracts = contracts.len()))]
    pub async fn apply_with_cancel(
        &self,
        contracts: &NodeContracts,
        desired: &Deployments,
        cancel: &CancellationToken,
    ) -> std::result::Result<NodeContracts, BatchFailure> {
        let mut batch = Batch::new(contracts.clone());

        let invalid: Vec<NodeFailure> = desired
            .iter()
            .filter_map(|(node, deployment)| {
                deployment.validate().err().map(|e| NodeFailure {
                    node: *node,
                    step: Step::Validate,
                    error: e.into(),
                })
            })
            .collect();
        if !invalid.is_empty() {
            batch.failures = invalid;
            return Err(batch.into_failure());
        }

        let live = match self.fetch_live(contracts, desired).await {
            Ok(live) => live,
            Err(failures) => {
                warn!(failed = failures.len(), "Could not read live deployments, nothing applied");
                batch.failures = failures;
                return Err(batch.into_failure());
            }
        };

        let plan = plan(desired, contracts, &live);
        info!(
            create = plan.to_create.len(),
            update = plan.to_update.len(),
            delete = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "Applying plan"
        );
        if plan.is_noop() {
            return Ok(batch.contracts);
        }

        if cancel.is_cancelled() {
            return Err(self.abandon(batch).await);
        }
        let creates = plan
            .to_create
            .iter()
            .filter_map(|node| desired.get(node).map(|d| self.create_node(*node, d)));
        if batch.absorb(join_all(creates).await) {
            return Err(self.compensate(batch).await);
        }

        if cancel.is_cancelled() {
            return Err(self.abandon(batch).await);
        }
        let updates = plan.to_update.iter().filter_map(|node| {
            let contract = *contracts.get(node)?;
            let current = live.get(node)?;
            let target = desired.get(node)?;
            Some(self.update_node(*node, contract, current, target))
        });
        if batch.absorb(join_all(updates).await) {
            return Err(self.compensate(batch).await);
        }

        if cancel.is_cancelled() {
            return Err(self.abandon(batch).await);
        }
        let deletes = plan
            .to_delete
            .iter()
            .filter_map(|node| contracts.get(node).map(|c| self.delete_node(*node, *c)));
        if batch.absorb(join_all(deletes).await) {
            return Err(self.compensate(batch).await);
        }

        info!(contracts = batch.contracts.len(), "Batch applied");
        Ok(batch.contracts)
    }

    async fn abandon(&self, mut batch: Batch) -> BatchFailure {
        warn!(mutated = batch.mutations.len(), "Batch cancelled");
        batch.cancelled = true;
        self.compensate(batch).await
    }
}

#[async_trait]
impl Deployer for Reconciler {
    async fn apply(
        &self,
        contracts: &NodeContracts,
        desired: &Deployments,
    ) -> std::result::Result<NodeContracts, BatchFailure> {
        self.apply_with_cancel(contracts, desired, &CancellationToken::new())
            .await
    }

    #[instrument(skip_all, fields(contracts = contracts.len()))]
    async fn sync(&self, contracts: &mut NodeContracts, view: &mut Deployments) -> Result<()> {
        sync_contracts(self.ledger.as_ref(), contracts, self.request_timeout).await?;
        view.retain(|node, _| contracts.contains_key(node));

        let fetches = view
            .keys()
            .filter_map(|node| contracts.get(node).map(|contract| (*node, *contract)))
            .map(move |(node, contract)| async move {
                let outcome = self
                    .get_deployment(node, contract, self.request_timeout)
                    .await;
                (node, outcome)
            });
        let fetched = join_all(fetches).await;

        for (node, outcome) in fetched {
            match outcome {
                Ok(live) => {
                    if let Some(local) = view.get_mut(&node) {
                        merge_results(local, &live);
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(node = %node, "Deployment gone, dropping from view");
                    view.remove(&node);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

