//! Planner - classifies nodes into create, update, delete or unchanged

use grid_types::{Deployment, NodeContracts, NodeId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Deployments keyed by the node they live on
pub type Deployments = BTreeMap<NodeId, Deployment>;

/// What `apply` does to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    Unchanged,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
            Action::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Partition of the nodes touched by one batch. Every node appears in
/// exactly one bucket, in ascending node order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub to_create: Vec<NodeId>,
    pub to_update: Vec<NodeId>,
    pub to_delete: Vec<NodeId>,
    pub unchanged: Vec<NodeId>,
}

impl Plan {
    /// True when applying the plan would not touch any node
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn action(&self, node: NodeId) -> Option<Action> {
        let buckets = [
            (&self.to_create, Action::Create),
            (&self.to_update, Action::Update),
            (&self.to_delete, Action::Delete),
            (&self.unchanged, Action::Unchanged),
        ];
        buckets
            .into_iter()
            .find(|(nodes, _)| nodes.contains(&node))
            .map(|(_, action)| action)
    }
}

/// Compute the plan for moving from `contracts` (with the deployments
/// currently `live` on those nodes) to `desired`.
///
/// A node with a contract is unchanged when the desired fingerprint equals
/// the fingerprint of the live deployment's non-deleted workloads.
pub fn plan(desired: &Deployments, contracts: &NodeContracts, live: &Deployments) -> Plan {
    let mut plan = Plan::default();

    for (node, deployment) in desired {
        let action = if !contracts.contains_key(node) {
            Action::Create
        } else {
            match live.get(node) {
                Some(current) if current.active().fingerprint() == deployment.fingerprint() => {
                    Action::Unchanged
                }
                _ => Action::Update,
            }
        };
        debug!(node = %node, action = %action, "Planned node");
        match action {
            Action::Create => plan.to_create.push(*node),
            Action::Update => plan.to_update.push(*node),
            _ => plan.unchanged.push(*node),
        }
    }

    for node in contracts.keys() {
        if !desired.contains_key(node) {
            debug!(node = %node, action = %Action::Delete, "Planned node");
            plan.to_delete.push(*node);
        }
    }

    plan
}
