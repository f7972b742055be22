//! Contract ledger trait

use crate::contract::{AccountInfo, Contract, NodeInfo, TwinInfo};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use grid_types::{ContractId, Fingerprint, Identity, NodeContracts, NodeId, TwinId};
use tracing::{debug, info};

/// Operations the engine needs from the contract ledger.
///
/// Mutations are signed by `identity`; a contract can only be changed by
/// the twin that owns it.
#[async_trait]
pub trait ContractLedger: Send + Sync {
    /// Reserve capacity on `node` for a deployment with fingerprint `hash`
    async fn create_node_contract(
        &self,
        identity: &Identity,
        node: NodeId,
        hash: &Fingerprint,
        public_ips: u32,
    ) -> Result<ContractId>;

    /// Record a new fingerprint on an existing node contract
    async fn update_node_contract(
        &self,
        identity: &Identity,
        contract: ContractId,
        hash: &Fingerprint,
    ) -> Result<ContractId>;

    async fn cancel_contract(&self, identity: &Identity, contract: ContractId) -> Result<()>;

    /// Reserve a gateway name. Fails if the name is already reserved.
    async fn create_name_contract(&self, identity: &Identity, name: &str) -> Result<ContractId>;

    async fn get_contract(&self, contract: ContractId) -> Result<Contract>;

    async fn get_node(&self, node: NodeId) -> Result<NodeInfo>;

    /// Account of `identity`; [`LedgerError::NotFound`] if it was never funded
    async fn get_account(&self, identity: &Identity) -> Result<AccountInfo>;

    /// Active name contract reserving `name`
    async fn get_contract_id_by_name(&self, name: &str) -> Result<ContractId>;

    async fn get_twin(&self, twin: TwinId) -> Result<TwinInfo>;

    async fn get_twin_by_pub_key(&self, public_key: &[u8; 32]) -> Result<TwinId>;

    /// True when the contract exists and has not been cancelled
    async fn is_valid_contract(&self, contract: ContractId) -> Result<bool> {
        if contract.is_unset() {
            return Ok(false);
        }
        match self.get_contract(contract).await {
            Ok(found) => Ok(found.is_active()),
            Err(LedgerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop entries whose contracts are gone or cancelled
    async fn delete_invalid_contracts(&self, contracts: &mut NodeContracts) -> Result<()> {
        let mut invalid = Vec::new();
        for (node, contract) in contracts.iter() {
            if !self.is_valid_contract(*contract).await? {
                invalid.push(*node);
            }
        }
        for node in invalid {
            if let Some(contract) = contracts.remove(&node) {
                debug!(node = %node, contract = %contract, "Dropping invalid contract");
            }
        }
        Ok(())
    }

    /// Cancel `contract` unless it is unset or already gone
    async fn ensure_contract_canceled(
        &self,
        identity: &Identity,
        contract: ContractId,
    ) -> Result<()> {
        if !self.is_valid_contract(contract).await? {
            return Ok(());
        }
        self.cancel_contract(identity, contract).await
    }

    /// Check whether an existing name contract can be reused for `name`.
    ///
    /// Returns the contract when it is active and reserves `name`. A stale
    /// contract for a different name is cancelled. Otherwise returns
    /// [`ContractId::UNSET`] so the caller knows to reserve the name anew.
    async fn invalidate_name_contract(
        &self,
        identity: &Identity,
        contract: ContractId,
        name: &str,
    ) -> Result<ContractId> {
        if contract.is_unset() {
            return Ok(ContractId::UNSET);
        }
        let found = match self.get_contract(contract).await {
            Ok(found) => found,
            Err(LedgerError::NotFound(_)) => return Ok(ContractId::UNSET),
            Err(e) => return Err(e),
        };
        if !found.is_active() {
            return Ok(ContractId::UNSET);
        }
        if found.name() == Some(name) {
            return Ok(contract);
        }

        info!(contract = %contract, name, "Cancelling stale name contract");
        self.cancel_contract(identity, contract).await?;
        Ok(ContractId::UNSET)
    }
}
