//! In-memory ledger
//!
//! Suitable for development and testing. Contract ids are allocated from a
//! counter starting at 1; cancelled contracts stay readable in the deleted
//! state.

use crate::contract::{AccountInfo, Contract, ContractKind, ContractState, NodeInfo, TwinInfo};
use crate::error::{LedgerError, Result};
use crate::ledger::ContractLedger;
use async_trait::async_trait;
use dashmap::DashMap;
use grid_types::{ContractId, Fingerprint, Identity, NodeId, TwinId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Ledger operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    CreateNodeContract,
    UpdateNodeContract,
    Cancel,
    CreateNameContract,
    Get,
    GetAccount,
}

pub struct InMemoryLedger {
    contracts: DashMap<ContractId, Contract>,
    names: DashMap<String, ContractId>,
    nodes: DashMap<NodeId, NodeInfo>,
    accounts: DashMap<[u8; 32], AccountInfo>,
    twins: DashMap<TwinId, TwinInfo>,
    next_id: AtomicU64,
    failing: DashMap<LedgerOp, LedgerError>,
    failing_contracts: DashMap<(LedgerOp, ContractId), LedgerError>,
    writes: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
            names: DashMap::new(),
            nodes: DashMap::new(),
            accounts: DashMap::new(),
            twins: DashMap::new(),
            next_id: AtomicU64::new(1),
            failing: DashMap::new(),
            failing_contracts: DashMap::new(),
            writes: AtomicUsize::new(0),
        }
    }

    /// Register a node operated by `twin`
    pub fn register_node(&self, node: NodeId, twin: TwinId) {
        self.nodes.insert(
            node,
            NodeInfo {
                node_id: node,
                twin_id: twin,
            },
        );
    }

    /// Fund the account behind `identity` and register its twin
    pub fn register_account(&self, identity: &Identity, free: u128) {
        let public_key = identity.public_key();
        self.accounts.insert(
            public_key,
            AccountInfo {
                free,
                reserved: 0,
            },
        );
        self.twins.insert(
            identity.twin_id(),
            TwinInfo {
                twin_id: identity.twin_id(),
                public_key,
            },
        );
    }

    pub fn fail(&self, op: LedgerOp, error: LedgerError) {
        self.failing.insert(op, error);
    }

    /// Like [`fail`](Self::fail), restricted to calls on one contract
    pub fn fail_contract(&self, op: LedgerOp, contract: ContractId, error: LedgerError) {
        self.failing_contracts.insert((op, contract), error);
    }

    pub fn heal(&self, op: LedgerOp) {
        self.failing.remove(&op);
        self.failing_contracts.retain(|(failing, _), _| *failing != op);
    }

    /// Read a contract without going through failure injection
    pub fn contract(&self, contract: ContractId) -> Option<Contract> {
        self.contracts.get(&contract).map(|c| c.clone())
    }

    /// Contracts not yet cancelled
    pub fn active_contracts(&self) -> Vec<Contract> {
        self.contracts
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.value().clone())
            .collect()
    }

    /// Number of accepted mutations
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, op: LedgerOp) -> Result<()> {
        match self.failing.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn check_contract(&self, op: LedgerOp, contract: ContractId) -> Result<()> {
        self.check(op)?;
        match self.failing_contracts.get(&(op, contract)) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn insert(&self, twin: TwinId, kind: ContractKind) -> ContractId {
        let contract_id = ContractId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.contracts.insert(
            contract_id,
            Contract {
                contract_id,
                twin_id: twin,
                state: ContractState::Created,
                kind,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        contract_id
    }

    fn owned_active(&self, identity: &Identity, contract: ContractId) -> Result<Contract> {
        let found = self
            .contracts
            .get(&contract)
            .map(|c| c.clone())
            .ok_or_else(|| LedgerError::NotFound(contract.to_string()))?;
        if found.twin_id != identity.twin_id() {
            return Err(LedgerError::Unauthorized(format!(
                "{} is not owned by {}",
                contract,
                identity.twin_id()
            )));
        }
        if !found.is_active() {
            return Err(LedgerError::Rejected(format!("{} is cancelled", contract)));
        }
        Ok(found)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContractLedger for InMemoryLedger {
    async fn create_node_contract(
        &self,
        identity: &Identity,
        node: NodeId,
        hash: &Fingerprint,
        public_ips: u32,
    ) -> Result<ContractId> {
        self.check(LedgerOp::CreateNodeContract)?;
        if !self.nodes.contains_key(&node) {
            return Err(LedgerError::NotFound(node.to_string()));
        }
        Ok(self.insert(
            identity.twin_id(),
            ContractKind::Node {
                node_id: node,
                deployment_hash: *hash,
                public_ips,
            },
        ))
    }

    async fn update_node_contract(
        &self,
        identity: &Identity,
        contract: ContractId,
        hash: &Fingerprint,
    ) -> Result<ContractId> {
        self.check_contract(LedgerOp::UpdateNodeContract, contract)?;
        self.owned_active(identity, contract)?;

        let mut entry = self
            .contracts
            .get_mut(&contract)
            .ok_or_else(|| LedgerError::NotFound(contract.to_string()))?;
        match &mut entry.kind {
            ContractKind::Node {
                deployment_hash, ..
            } => *deployment_hash = *hash,
            ContractKind::Name { .. } => return Err(LedgerError::NotNodeContract(contract)),
        }
        drop(entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(contract)
    }

    async fn cancel_contract(&self, identity: &Identity, contract: ContractId) -> Result<()> {
        self.check_contract(LedgerOp::Cancel, contract)?;
        let found = self.owned_active(identity, contract)?;

        if let Some(name) = found.name() {
            self.names.remove(name);
        }
        if let Some(mut entry) = self.contracts.get_mut(&contract) {
            entry.state = ContractState::Deleted;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_name_contract(&self, identity: &Identity, name: &str) -> Result<ContractId> {
        self.check(LedgerOp::CreateNameContract)?;
        if let Some(existing) = self.names.get(name) {
            return Err(LedgerError::Rejected(format!(
                "name {} is already reserved by {}",
                name,
                existing.value()
            )));
        }
        let contract_id = self.insert(
            identity.twin_id(),
            ContractKind::Name {
                name: name.to_string(),
            },
        );
        self.names.insert(name.to_string(), contract_id);
        Ok(contract_id)
    }

    async fn get_contract(&self, contract: ContractId) -> Result<Contract> {
        self.check_contract(LedgerOp::Get, contract)?;
        self.contract(contract)
            .ok_or_else(|| LedgerError::NotFound(contract.to_string()))
    }

    async fn get_node(&self, node: NodeId) -> Result<NodeInfo> {
        self.nodes
            .get(&node)
            .map(|n| *n)
            .ok_or_else(|| LedgerError::NotFound(node.to_string()))
    }

    async fn get_account(&self, identity: &Identity) -> Result<AccountInfo> {
        self.check(LedgerOp::GetAccount)?;
        self.accounts
            .get(&identity.public_key())
            .map(|a| *a)
            .ok_or_else(|| LedgerError::NotFound(format!("account of {}", identity.twin_id())))
    }

    async fn get_contract_id_by_name(&self, name: &str) -> Result<ContractId> {
        self.names
            .get(name)
            .map(|c| *c)
            .ok_or_else(|| LedgerError::NotFound(format!("name {}", name)))
    }

    async fn get_twin(&self, twin: TwinId) -> Result<TwinInfo> {
        self.twins
            .get(&twin)
            .map(|t| *t)
            .ok_or_else(|| LedgerError::NotFound(twin.to_string()))
    }

    async fn get_twin_by_pub_key(&self, public_key: &[u8; 32]) -> Result<TwinId> {
        self.twins
            .iter()
            .find(|t| &t.public_key == public_key)
            .map(|t| t.twin_id)
            .ok_or_else(|| LedgerError::NotFound("no twin for public key".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_types::{Deployment, NodeContracts};

    fn identity(twin: u32) -> Identity {
        Identity::from_seed(TwinId::new(twin), [twin as u8; 32])
    }

    fn hash() -> Fingerprint {
        Deployment::new(TwinId::new(1)).fingerprint()
    }

    fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.register_node(NodeId::new(10), TwinId::new(100));
        ledger
    }

    #[tokio::test]
    async fn test_node_contract_lifecycle() {
        let ledger = ledger();
        let me = identity(1);

        let id = ledger
            .create_node_contract(&me, NodeId::new(10), &hash(), 0)
            .await
            .unwrap();
        assert!(ledger.is_valid_contract(id).await.unwrap());

        let other = Deployment::new(TwinId::new(2)).fingerprint();
        assert_eq!(ledger.update_node_contract(&me, id, &other).await.unwrap(), id);
        assert_eq!(ledger.contract(id).unwrap().deployment_hash(), Some(&other));

        ledger.cancel_contract(&me, id).await.unwrap();
        assert!(!ledger.is_valid_contract(id).await.unwrap());
        assert!(ledger.update_node_contract(&me, id, &other).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_node_rejected() {
        let ledger = ledger();
        let err = ledger
            .create_node_contract(&identity(1), NodeId::new(99), &hash(), 0)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_only_owner_can_cancel() {
        let ledger = ledger();
        let id = ledger
            .create_node_contract(&identity(1), NodeId::new(10), &hash(), 0)
            .await
            .unwrap();
        assert!(matches!(
            ledger.cancel_contract(&identity(2), id).await,
            Err(LedgerError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_name_contracts() {
        let ledger = ledger();
        let me = identity(1);

        let id = ledger.create_name_contract(&me, "name").await.unwrap();
        assert!(ledger.create_name_contract(&me, "name").await.is_err());
        assert!(matches!(
            ledger.update_node_contract(&me, id, &hash()).await,
            Err(LedgerError::NotNodeContract(_))
        ));

        // Same name reuses the reservation, a different one releases it
        assert_eq!(
            ledger.invalidate_name_contract(&me, id, "name").await.unwrap(),
            id
        );
        assert_eq!(
            ledger.invalidate_name_contract(&me, id, "other").await.unwrap(),
            ContractId::UNSET
        );
        assert!(!ledger.is_valid_contract(id).await.unwrap());
        assert!(ledger.create_name_contract(&me, "name").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_invalid_contracts() {
        let ledger = ledger();
        ledger.register_node(NodeId::new(11), TwinId::new(101));
        let me = identity(1);

        let keep = ledger
            .create_node_contract(&me, NodeId::new(10), &hash(), 0)
            .await
            .unwrap();
        let gone = ledger
            .create_node_contract(&me, NodeId::new(11), &hash(), 0)
            .await
            .unwrap();
        ledger.cancel_contract(&me, gone).await.unwrap();

        let mut contracts = NodeContracts::new();
        contracts.insert(NodeId::new(10), keep);
        contracts.insert(NodeId::new(11), gone);
        contracts.insert(NodeId::new(12), ContractId::new(999));

        ledger.delete_invalid_contracts(&mut contracts).await.unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[&NodeId::new(10)], keep);
    }

    #[tokio::test]
    async fn test_ensure_contract_canceled_is_idempotent() {
        let ledger = ledger();
        let me = identity(1);
        let id = ledger
            .create_node_contract(&me, NodeId::new(10), &hash(), 0)
            .await
            .unwrap();

        ledger.ensure_contract_canceled(&me, id).await.unwrap();
        ledger.ensure_contract_canceled(&me, id).await.unwrap();
        ledger
            .ensure_contract_canceled(&me, ContractId::UNSET)
            .await
            .unwrap();
        assert!(ledger.active_contracts().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let ledger = ledger();
        ledger.fail(
            LedgerOp::CreateNodeContract,
            LedgerError::Unreachable("connection reset".into()),
        );
        assert!(ledger
            .create_node_contract(&identity(1), NodeId::new(10), &hash(), 0)
            .await
            .is_err());
        assert_eq!(ledger.writes(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_for_one_contract() {
        let ledger = ledger();
        let me = identity(1);
        let a = ledger
            .create_node_contract(&me, NodeId::new(10), &hash(), 0)
            .await
            .unwrap();
        let b = ledger
            .create_node_contract(&me, NodeId::new(10), &hash(), 0)
            .await
            .unwrap();

        ledger.fail_contract(
            LedgerOp::UpdateNodeContract,
            b,
            LedgerError::Rejected("insufficient balance".into()),
        );
        assert!(ledger.update_node_contract(&me, a, &hash()).await.is_ok());
        assert!(ledger.update_node_contract(&me, b, &hash()).await.is_err());

        ledger.heal(LedgerOp::UpdateNodeContract);
        assert!(ledger.update_node_contract(&me, b, &hash()).await.is_ok());
    }

    #[tokio::test]
    async fn test_accounts_and_twins() {
        let ledger = ledger();
        let me = identity(1);
        assert!(ledger.get_account(&me).await.unwrap_err().is_not_found());

        ledger.register_account(&me, 30_000);
        assert_eq!(ledger.get_account(&me).await.unwrap().free, 30_000);
        assert_eq!(
            ledger.get_twin_by_pub_key(&me.public_key()).await.unwrap(),
            me.twin_id()
        );
        assert_eq!(
            ledger.get_twin(me.twin_id()).await.unwrap().public_key,
            me.public_key()
        );
        assert!(ledger.get_twin(TwinId::new(9)).await.is_err());
        assert!(ledger
            .get_twin_by_pub_key(&identity(2).public_key())
            .await
            .is_err());

        ledger.fail(LedgerOp::GetAccount, LedgerError::Unreachable("rpc".into()));
        assert!(ledger.get_account(&me).await.is_err());
    }

    #[tokio::test]
    async fn test_contract_id_by_name() {
        let ledger = ledger();
        let me = identity(1);
        let id = ledger.create_name_contract(&me, "name").await.unwrap();
        assert_eq!(ledger.get_contract_id_by_name("name").await.unwrap(), id);

        ledger.cancel_contract(&me, id).await.unwrap();
        assert!(ledger
            .get_contract_id_by_name("name")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
