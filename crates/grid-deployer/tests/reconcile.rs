//! End-to-end reconciliation scenarios over in-memory nodes and ledger

use grid_deployer::{
    CompensationOutcome, DeployError, Deployer, DeployerConfig, Deployments, Reconciler,
    StaticNodePool, Step,
};
use async_trait::async_trait;
use grid_ledger::{
    AccountInfo, Contract, ContractLedger, InMemoryLedger, LedgerError, LedgerOp, NodeInfo,
    TwinInfo,
};
use grid_node::{InMemoryNodeGateway, NodeError, NodeGateway, NodeOp};
use grid_types::{
    ContractId, Deployment, Fingerprint, Identity, NodeContracts, NodeId, ResultState, TwinId,
    Workload, WorkloadType,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const A: NodeId = NodeId::new(1);
const B: NodeId = NodeId::new(2);
const C: NodeId = NodeId::new(3);

struct Grid {
    ledger: Arc<InMemoryLedger>,
    nodes: BTreeMap<NodeId, Arc<InMemoryNodeGateway>>,
    reconciler: Reconciler,
}

impl Grid {
    fn new(nodes: &[NodeId]) -> Self {
        Self::with_config(nodes, &DeployerConfig::default())
    }

    fn with_config(nodes: &[NodeId], config: &DeployerConfig) -> Self {
        Self::build(nodes, config, |ledger| ledger)
    }

    /// The reconciler talks to `wrap(ledger)`, tests inspect `ledger`
    fn build(
        nodes: &[NodeId],
        config: &DeployerConfig,
        wrap: impl FnOnce(Arc<InMemoryLedger>) -> Arc<dyn ContractLedger>,
    ) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let pool = StaticNodePool::new();
        let mut gateways = BTreeMap::new();
        for node in nodes {
            ledger.register_node(*node, TwinId::new(100 + node.value()));
            let gateway = Arc::new(InMemoryNodeGateway::new());
            pool.insert(*node, gateway.clone());
            gateways.insert(*node, gateway);
        }
        let reconciler = Reconciler::new(
            Identity::from_seed(TwinId::new(7), [7u8; 32]),
            wrap(ledger.clone()),
            Arc::new(pool),
            config,
        );
        Self {
            ledger,
            nodes: gateways,
            reconciler,
        }
    }

    fn node(&self, node: NodeId) -> &InMemoryNodeGateway {
        &self.nodes[&node]
    }

    fn live(&self, node: NodeId, contracts: &NodeContracts) -> Deployment {
        self.node(node).deployment(contracts[&node]).unwrap()
    }

    fn node_writes(&self) -> usize {
        self.nodes.values().map(|n| n.writes()).sum()
    }
}

/// Ledger whose contract reads hang once stalled
struct StalledLedger {
    inner: Arc<InMemoryLedger>,
    stalled: AtomicBool,
}

impl StalledLedger {
    fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            stalled: AtomicBool::new(false),
        }
    }

    fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractLedger for StalledLedger {
    async fn create_node_contract(
        &self,
        identity: &Identity,
        node: NodeId,
        hash: &Fingerprint,
        public_ips: u32,
    ) -> grid_ledger::Result<ContractId> {
        self.inner
            .create_node_contract(identity, node, hash, public_ips)
            .await
    }

    async fn update_node_contract(
        &self,
        identity: &Identity,
        contract: ContractId,
        hash: &Fingerprint,
    ) -> grid_ledger::Result<ContractId> {
        self.inner.update_node_contract(identity, contract, hash).await
    }

    async fn cancel_contract(
        &self,
        identity: &Identity,
        contract: ContractId,
    ) -> grid_ledger::Result<()> {
        self.inner.cancel_contract(identity, contract).await
    }

    async fn create_name_contract(
        &self,
        identity: &Identity,
        name: &str,
    ) -> grid_ledger::Result<ContractId> {
        self.inner.create_name_contract(identity, name).await
    }

    async fn get_contract(&self, contract: ContractId) -> grid_ledger::Result<Contract> {
        if self.stalled.load(Ordering::SeqCst) {
            return futures::future::pending().await;
        }
        self.inner.get_contract(contract).await
    }

    async fn get_node(&self, node: NodeId) -> grid_ledger::Result<NodeInfo> {
        self.inner.get_node(node).await
    }

    async fn get_account(&self, identity: &Identity) -> grid_ledger::Result<AccountInfo> {
        self.inner.get_account(identity).await
    }

    async fn get_contract_id_by_name(&self, name: &str) -> grid_ledger::Result<ContractId> {
        self.inner.get_contract_id_by_name(name).await
    }

    async fn get_twin(&self, twin: TwinId) -> grid_ledger::Result<TwinInfo> {
        self.inner.get_twin(twin).await
    }

    async fn get_twin_by_pub_key(&self, public_key: &[u8; 32]) -> grid_ledger::Result<TwinId> {
        self.inner.get_twin_by_pub_key(public_key).await
    }
}

fn depl1() -> Deployment {
    Deployment::new(TwinId::new(7))
        .with_workload(Workload::new(
            "net",
            WorkloadType::Network,
            json!({"ip_range": "10.1.0.0/16"}),
        ))
        .with_workload(Workload::new(
            "vm",
            WorkloadType::Machine,
            json!({"cpu": 2, "memory": 2048}),
        ))
}

fn depl2() -> Deployment {
    Deployment::new(TwinId::new(7))
        .with_workload(Workload::new(
            "net",
            WorkloadType::Network,
            json!({"ip_range": "10.1.0.0/16"}),
        ))
        .with_workload(Workload::new(
            "vm",
            WorkloadType::Machine,
            json!({"cpu": 4, "memory": 4096}),
        ))
}

fn desired(entries: &[(NodeId, Deployment)]) -> Deployments {
    entries.iter().cloned().collect()
}

#[tokio::test]
async fn creates_independent_contracts_and_sync_matches_desired() {
    let grid = Grid::new(&[A, B]);
    let want = desired(&[(A, depl1()), (B, depl1())]);

    let contracts = grid
        .reconciler
        .apply(&NodeContracts::new(), &want)
        .await
        .unwrap();
    assert_eq!(contracts.len(), 2);
    assert_ne!(contracts[&A], contracts[&B]);

    let mut synced = contracts.clone();
    let mut view = want.clone();
    grid.reconciler.sync(&mut synced, &mut view).await.unwrap();
    assert_eq!(synced, contracts);

    for node in [A, B] {
        assert_eq!(view[&node].fingerprint(), depl1().fingerprint());
        assert!(view[&node].all_in_state(ResultState::Ok));

        let live = grid
            .node(node)
            .get(contracts[&node])
            .await
            .unwrap();
        assert_eq!(live.version, 1);
        assert_eq!(live.active().fingerprint(), depl1().fingerprint());

        let contract = grid.ledger.contract(contracts[&node]).unwrap();
        assert_eq!(contract.deployment_hash(), Some(&depl1().fingerprint()));
        assert_eq!(contract.twin_id, TwinId::new(7));
    }
}

#[tokio::test]
async fn deployments_are_signed_by_the_caller() {
    let grid = Grid::new(&[A]);
    let contracts = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(A, depl1())]))
        .await
        .unwrap();

    let live = grid.live(A, &contracts);
    let signatures = &live.signature_requirement.signatures;
    assert_eq!(signatures.len(), 1);
    assert!(grid
        .reconciler
        .identity()
        .verify(&live.fingerprint(), &signatures[0]));
}

#[tokio::test]
async fn second_apply_is_a_no_op() {
    let grid = Grid::new(&[A, B]);
    let want = desired(&[(A, depl1()), (B, depl2())]);

    let first = grid
        .reconciler
        .apply(&NodeContracts::new(), &want)
        .await
        .unwrap();
    let node_writes = grid.node_writes();
    let ledger_writes = grid.ledger.writes();

    let second = grid.reconciler.apply(&first, &want).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(grid.node_writes(), node_writes);
    assert_eq!(grid.ledger.writes(), ledger_writes);
}

#[tokio::test]
async fn dropping_a_node_deletes_it_and_leaves_others_alone() {
    let grid = Grid::new(&[A, B]);
    let first = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1())]),
        )
        .await
        .unwrap();
    let a_before = grid.live(A, &first);

    let second = grid
        .reconciler
        .apply(&first, &desired(&[(A, depl1())]))
        .await
        .unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second[&A], first[&A]);
    assert!(!grid
        .ledger
        .is_valid_contract(first[&B])
        .await
        .unwrap());

    let a_after = grid.live(A, &second);
    assert_eq!(a_after.version, a_before.version);
    assert_eq!(a_after, a_before);

    let b_after = grid.node(B).get(first[&B]).await.unwrap();
    assert!(b_after.all_in_state(ResultState::Deleted));
}

#[tokio::test]
async fn removed_workload_is_resubmitted_as_deleted() {
    let grid = Grid::new(&[A]);
    let first = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(A, depl1())]))
        .await
        .unwrap();

    let mut smaller = depl1();
    smaller.workloads.retain(|w| w.name != "vm");
    let second = grid
        .reconciler
        .apply(&first, &desired(&[(A, smaller.clone())]))
        .await
        .unwrap();

    let live = grid.live(A, &second);
    assert_eq!(live.version, 2);
    assert_eq!(live.workloads.len(), 2);
    let vm = live.get("vm").unwrap();
    assert_eq!(vm.result.state, ResultState::Deleted);
    assert_eq!(vm.version, 2);
    assert_eq!(live.get("net").unwrap().version, 1);
    assert_eq!(live.active().fingerprint(), smaller.fingerprint());

    // The node is converged now
    let writes = grid.node_writes();
    grid.reconciler
        .apply(&second, &desired(&[(A, smaller)]))
        .await
        .unwrap();
    assert_eq!(grid.node_writes(), writes);
}

#[tokio::test]
async fn rejected_ledger_update_rolls_back_the_other_node() {
    let grid = Grid::new(&[A, B]);
    let before = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1())]),
        )
        .await
        .unwrap();
    let a_before = grid.live(A, &before);
    let b_before = grid.live(B, &before);

    grid.ledger.fail_contract(
        LedgerOp::UpdateNodeContract,
        before[&B],
        LedgerError::Rejected("insufficient balance".into()),
    );
    let failure = grid
        .reconciler
        .apply(&before, &desired(&[(A, depl2()), (B, depl2())]))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![B]);
    assert_eq!(failure.failures[0].step, Step::Update);
    assert!(matches!(
        failure.failures[0].error,
        DeployError::LedgerRejected(_)
    ));
    assert!(failure.is_fully_rolled_back());
    assert_eq!(failure.contracts, before);

    // A went forward and back: same content, newer version
    let a_after = grid.live(A, &before);
    assert_eq!(
        a_after.active().fingerprint(),
        a_before.active().fingerprint()
    );
    assert_eq!(a_after.version, 3);
    assert_eq!(
        grid.ledger.contract(before[&A]).unwrap().deployment_hash(),
        Some(&a_after.fingerprint())
    );

    // B was never touched
    assert_eq!(grid.live(B, &before), b_before);
}

#[tokio::test]
async fn failed_deploy_rolls_back_every_create() {
    let grid = Grid::new(&[A, B, C]);
    grid.node(C)
        .fail(NodeOp::Deploy, NodeError::Rejected("no capacity".into()));

    let failure = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1()), (C, depl1())]),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![C]);
    assert!(failure.contracts.is_empty());
    assert!(failure.is_fully_rolled_back());
    assert_eq!(failure.compensations.len(), 3);
    assert!(grid.ledger.active_contracts().is_empty());
    assert_eq!(grid.node(C).deployment_count(), 0);
    for node in [A, B] {
        assert_eq!(grid.node(node).deployment_count(), 1);
        let stored: Vec<Deployment> = (1..=3)
            .filter_map(|id| grid.node(node).deployment(ContractId::new(id)))
            .collect();
        assert!(stored[0].all_in_state(ResultState::Deleted));
    }
}

#[tokio::test]
async fn failed_update_bucket_undoes_creates() {
    let grid = Grid::new(&[A, B]);
    let before = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(B, depl1())]))
        .await
        .unwrap();
    let b_hash = grid.ledger.contract(before[&B]).unwrap().deployment_hash().copied();

    grid.node(B)
        .fail(NodeOp::Update, NodeError::Unreachable("connection reset".into()));
    let failure = grid
        .reconciler
        .apply(&before, &desired(&[(A, depl1()), (B, depl2())]))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![B]);
    assert!(matches!(
        failure.failures[0].error,
        DeployError::RemoteUnreachable(_)
    ));
    assert!(failure.is_fully_rolled_back());
    assert_eq!(failure.contracts, before);

    // B's contract hash was restored, A's create was undone
    assert_eq!(
        grid.ledger.contract(before[&B]).unwrap().deployment_hash().copied(),
        b_hash
    );
    assert_eq!(grid.ledger.active_contracts().len(), 1);
}

#[tokio::test]
async fn deletions_cannot_be_undone() {
    let grid = Grid::new(&[A, B, C]);
    let before = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1()), (C, depl1())]),
        )
        .await
        .unwrap();

    grid.node(C)
        .fail(NodeOp::Delete, NodeError::Timeout(std::time::Duration::from_secs(30)));
    let failure = grid
        .reconciler
        .apply(&before, &desired(&[(A, depl2())]))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![C]);
    assert!(!failure.is_fully_rolled_back());
    let b_outcome = failure
        .compensations
        .iter()
        .find(|c| c.node == B)
        .map(|c| c.outcome.clone());
    assert_eq!(
        b_outcome,
        Some(CompensationOutcome::PermanentLoss {
            contract: before[&B]
        })
    );

    // B is gone for good, C keeps its contract, A is reverted
    assert!(!failure.contracts.contains_key(&B));
    assert_eq!(failure.contracts[&C], before[&C]);
    assert_eq!(failure.contracts[&A], before[&A]);
    assert_eq!(
        grid.live(A, &before).active().fingerprint(),
        depl1().fingerprint()
    );
}

#[tokio::test]
async fn failed_compensation_is_reported() {
    let grid = Grid::new(&[A, B]);
    grid.node(A)
        .fail(NodeOp::Delete, NodeError::Unreachable("offline".into()));
    grid.node(B)
        .fail(NodeOp::Deploy, NodeError::Rejected("bad image".into()));

    let failure = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1())]),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![B]);
    assert!(!failure.is_fully_rolled_back());
    let a_outcome = failure
        .compensations
        .iter()
        .find(|c| c.node == A)
        .map(|c| c.outcome.clone());
    assert!(matches!(a_outcome, Some(CompensationOutcome::Failed(_))));

    // A's contract stays mapped so a later batch can clean it up
    assert!(failure.contracts.contains_key(&A));
    assert!(!failure.contracts.contains_key(&B));

    grid.node(A).heal(NodeOp::Delete);
    let cleaned = grid
        .reconciler
        .apply(&failure.contracts, &Deployments::new())
        .await
        .unwrap();
    assert!(cleaned.is_empty());
    assert!(grid.ledger.active_contracts().is_empty());
}

#[tokio::test]
async fn unreadable_node_aborts_before_any_change() {
    let grid = Grid::new(&[A, B]);
    let before = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(A, depl1())]))
        .await
        .unwrap();
    let node_writes = grid.node_writes();
    let ledger_writes = grid.ledger.writes();

    grid.node(A)
        .fail(NodeOp::Get, NodeError::Unreachable("offline".into()));
    let failure = grid
        .reconciler
        .apply(&before, &desired(&[(A, depl2()), (B, depl1())]))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![A]);
    assert_eq!(failure.failures[0].step, Step::Fetch);
    assert!(failure.compensations.is_empty());
    assert_eq!(failure.contracts, before);
    assert_eq!(grid.node_writes(), node_writes);
    assert_eq!(grid.ledger.writes(), ledger_writes);
}

#[tokio::test]
async fn invalid_deployment_is_refused() {
    let grid = Grid::new(&[A]);
    let duplicate = depl1().with_workload(Workload::new("vm", WorkloadType::Zdb, json!({})));

    let failure = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(A, duplicate)]))
        .await
        .unwrap_err();
    assert_eq!(failure.failures[0].step, Step::Validate);
    assert!(matches!(
        failure.failures[0].error,
        DeployError::Validation(_)
    ));
    assert_eq!(grid.ledger.writes(), 0);
}

#[tokio::test]
async fn sync_prunes_cancelled_contracts_and_deleted_workloads() {
    let grid = Grid::new(&[A, B]);
    let want = desired(&[(A, depl1()), (B, depl1())]);
    let mut contracts = grid
        .reconciler
        .apply(&NodeContracts::new(), &want)
        .await
        .unwrap();

    // B's contract expires on the ledger; A's vm is removed out of band
    grid.ledger
        .cancel_contract(grid.reconciler.identity(), contracts[&B])
        .await
        .unwrap();
    let mut a_live = grid.live(A, &contracts);
    a_live.get_mut("vm").unwrap().result.state = ResultState::Deleted;
    grid.node(A).insert(a_live);

    let mut view = want.clone();
    grid.reconciler
        .sync(&mut contracts, &mut view)
        .await
        .unwrap();

    assert_eq!(contracts.keys().copied().collect::<Vec<_>>(), vec![A]);
    assert!(!view.contains_key(&B));
    assert!(view[&A].get("vm").is_none());
    assert!(view[&A].get("net").is_some());
}

#[tokio::test]
async fn liveness_check_reports_down_nodes() {
    let grid = Grid::new(&[A, B]);
    grid.reconciler.are_nodes_up(&[A, B]).await.unwrap();

    grid.node(B).go_down();
    match grid.reconciler.are_nodes_up(&[A, B]).await {
        Err(DeployError::NodesUnreachable(down)) => {
            assert_eq!(down.len(), 1);
            assert_eq!(down[0].0, B);
        }
        other => panic!("expected unreachable nodes, got {other:?}"),
    }
}

#[tokio::test]
async fn sync_gives_up_on_a_ledger_that_never_answers() {
    let config = DeployerConfig {
        request_timeout_secs: 1,
        ..Default::default()
    };
    let mut stalled = None;
    let grid = Grid::build(&[A], &config, |ledger| {
        let wrapper = Arc::new(StalledLedger::new(ledger));
        stalled = Some(wrapper.clone());
        wrapper
    });
    let stalled = stalled.unwrap();

    let mut contracts = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(A, depl1())]))
        .await
        .unwrap();
    let before = contracts.clone();

    stalled.stall();
    let mut view = desired(&[(A, depl1())]);
    let synced = tokio::time::timeout(
        Duration::from_secs(5),
        grid.reconciler.sync(&mut contracts, &mut view),
    )
    .await
    .expect("sync must honor its deadline");

    assert!(matches!(synced, Err(DeployError::RemoteUnreachable(_))));
    assert_eq!(contracts, before);
}

#[tokio::test]
async fn sync_drops_nodes_whose_deployment_is_gone() {
    let grid = Grid::new(&[A, B]);
    let want = desired(&[(A, depl1()), (B, depl1())]);
    let mut contracts = grid
        .reconciler
        .apply(&NodeContracts::new(), &want)
        .await
        .unwrap();

    // B lost the deployment while its contract is still valid
    grid.node(B).forget(contracts[&B]);
    assert!(grid.ledger.contract(contracts[&B]).unwrap().is_active());

    let mut view = want.clone();
    grid.reconciler
        .sync(&mut contracts, &mut view)
        .await
        .unwrap();

    assert!(view.contains_key(&A));
    assert!(!view.contains_key(&B));
    // The contract is the ledger's business, sync leaves it mapped
    assert!(contracts.contains_key(&B));
}

#[tokio::test]
async fn timed_out_compensation_keeps_the_contract() {
    let config = DeployerConfig {
        compensation_timeout_secs: 1,
        ..Default::default()
    };
    let grid = Grid::with_config(&[A, B], &config);
    grid.node(A).slow_down(NodeOp::Delete, Duration::from_secs(3));
    grid.node(B)
        .fail(NodeOp::Deploy, NodeError::Rejected("no capacity".into()));

    let failure = grid
        .reconciler
        .apply(
            &NodeContracts::new(),
            &desired(&[(A, depl1()), (B, depl1())]),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.failed_nodes(), vec![B]);
    let a_outcome = failure
        .compensations
        .iter()
        .find(|c| c.node == A)
        .map(|c| c.outcome.clone());
    assert!(matches!(a_outcome, Some(CompensationOutcome::Failed(_))));
    assert!(!failure.is_fully_rolled_back());

    let a_contract = failure.contracts[&A];
    assert!(grid.ledger.contract(a_contract).unwrap().is_active());
}

#[tokio::test]
async fn cancellation_between_buckets_compensates() {
    let grid = Grid::new(&[A, B]);
    let before = grid
        .reconciler
        .apply(&NodeContracts::new(), &desired(&[(B, depl1())]))
        .await
        .unwrap();
    let b_version = grid.live(B, &before).version;

    grid.node(A).slow_down(NodeOp::Deploy, Duration::from_millis(300));
    let cancel = CancellationToken::new();
    let target = desired(&[(A, depl1()), (B, depl2())]);
    let (applied, ()) = tokio::join!(
        grid.reconciler.apply_with_cancel(
            &before,
            &target,
            &cancel,
        ),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    );

    let failure = applied.unwrap_err();
    assert!(failure.cancelled);
    assert!(failure.failures.is_empty());
    assert!(failure.is_fully_rolled_back());
    assert_eq!(failure.contracts, before);

    // A's in-flight create finished and was undone, B's update never ran
    assert_eq!(failure.compensations.len(), 1);
    assert_eq!(failure.compensations[0].node, A);
    assert_eq!(grid.live(B, &before).version, b_version);
    assert_eq!(grid.ledger.active_contracts().len(), 1);
}

#[tokio::test]
async fn cancelled_before_start_changes_nothing() {
    let grid = Grid::new(&[A]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = grid
        .reconciler
        .apply_with_cancel(&NodeContracts::new(), &desired(&[(A, depl1())]), &cancel)
        .await
        .unwrap_err();

    assert!(failure.cancelled);
    assert!(failure.compensations.is_empty());
    assert!(failure.contracts.is_empty());
    assert_eq!(grid.ledger.writes(), 0);
    assert_eq!(grid.node_writes(), 0);
}
