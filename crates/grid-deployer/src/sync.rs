//! Sync - pulls ledger and node truth back into the caller's view

use crate::deadline::within;
use crate::error::Result;
use futures::future::join_all;
use grid_ledger::ContractLedger;
use grid_types::{Deployment, NodeContracts};
use std::time::Duration;
use tracing::{debug, info};

/// Drop map entries whose contracts are gone or cancelled.
///
/// Contracts are checked concurrently, each within `limit`. Any check that
/// fails or times out leaves the map untouched.
pub async fn sync_contracts(
    ledger: &dyn ContractLedger,
    contracts: &mut NodeContracts,
    limit: Duration,
) -> Result<()> {
    let checks = contracts.iter().map(move |(node, contract)| async move {
        let valid = within(limit, "check contract", ledger.is_valid_contract(*contract)).await;
        (*node, valid)
    });
    let mut invalid = Vec::new();
    for (node, valid) in join_all(checks).await {
        if !valid? {
            invalid.push(node);
        }
    }

    for node in &invalid {
        if let Some(contract) = contracts.remove(node) {
            debug!(node = %node, contract = %contract, "Dropping invalid contract");
        }
    }
    if !invalid.is_empty() {
        info!(dropped = invalid.len(), "Dropped invalid contracts");
    }
    Ok(())
}

/// Merge the node's view of a deployment into the caller's.
///
/// Workloads the node reports as deleted are removed from `view`. The others
/// take the node's version and result. Workloads unknown to the node are
/// left as they are.
pub fn merge_results(view: &mut Deployment, live: &Deployment) {
    view.version = live.version;
    view.contract_id = live.contract_id;
    view.workloads.retain_mut(|workload| match live.get(&workload.name) {
        Some(remote) if remote.is_deleted() => false,
        Some(remote) => {
            workload.version = remote.version;
            workload.result = remote.result.clone();
            true
        }
        None => true,
    });
}
