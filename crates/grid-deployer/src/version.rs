//! Version assignment
//!
//! A deployment's version advances whenever any of its workloads changes.
//! Each workload keeps the version at which its own content last changed.
//! Workloads dropped from the desired set stay in the submitted deployment
//! with their state set to `deleted`: nodes treat a workload missing from
//! the list as an error, not as a removal.

use crate::error::{DeployError, Result};
use grid_types::{Deployment, ResultState, WorkloadResult};

/// Build the deployment to submit for `desired`, given what the node
/// currently holds (`None` for a new deployment).
///
/// Results are never carried over from the caller; only the node writes
/// them. Fails when the node's version counter is exhausted.
pub fn assign_versions(previous: Option<&Deployment>, desired: &Deployment) -> Result<Deployment> {
    let mut next = desired.clone();
    next.signature_requirement.signatures.clear();

    let Some(previous) = previous else {
        next.version = 1;
        for workload in next.workloads.iter_mut() {
            workload.version = 1;
            workload.result = WorkloadResult::default();
        }
        return Ok(next);
    };

    let version = previous.version.checked_add(1).ok_or_else(|| {
        DeployError::Validation(format!(
            "{} is at the last version {}",
            previous.contract_id, previous.version
        ))
    })?;
    let mut changed = false;
    next.contract_id = previous.contract_id;

    for workload in next.workloads.iter_mut() {
        workload.result = WorkloadResult::default();
        match previous.get(&workload.name) {
            Some(old) if !old.is_deleted() && old.same_content(workload) => {
                workload.version = old.version;
            }
            _ => {
                workload.version = version;
                changed = true;
            }
        }
    }

    for old in &previous.workloads {
        if desired.get(&old.name).is_some() {
            continue;
        }
        let mut gone = old.clone();
        if !gone.is_deleted() {
            gone.version = version;
            gone.result = WorkloadResult::with_state(ResultState::Deleted);
            changed = true;
        }
        next.workloads.push(gone);
    }

    // Reordering or re-weighting changes no single workload
    changed = changed || previous.active().fingerprint() != desired.fingerprint();
    next.version = if changed { version } else { previous.version };
    Ok(next)
}
