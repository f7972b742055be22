//! Fleet liveness check
//!
//! One concurrent check per node. Each branch reports into its own slot and
//! the slots are merged once every branch has finished.

use crate::deadline::within;
use crate::error::{DeployError, Result};
use crate::pool::NodeClientPool;
use futures::future::join_all;
use grid_types::NodeId;
use std::time::Duration;
use tracing::{info, warn};

/// Check that every node in `nodes` answers within `timeout`.
///
/// Fails with [`DeployError::NodesUnreachable`] listing every node that did
/// not answer, in the order given.
pub async fn are_nodes_up(
    pool: &dyn NodeClientPool,
    nodes: &[NodeId],
    timeout: Duration,
) -> Result<()> {
    let checks = nodes.iter().map(move |&node| async move {
        let outcome = match within(timeout, "resolve node", pool.client(node)).await {
            Ok(gateway) => gateway.is_up(timeout).await.map_err(DeployError::from),
            Err(e) => Err(e),
        };
        (node, outcome)
    });
    let slots = join_all(checks).await;

    let down: Vec<(NodeId, String)> = slots
        .into_iter()
        .filter_map(|(node, outcome)| outcome.err().map(|e| (node, e.to_string())))
        .collect();

    if down.is_empty() {
        info!(nodes = nodes.len(), "All nodes up");
        Ok(())
    } else {
        warn!(down = down.len(), "Nodes unreachable");
        Err(DeployError::NodesUnreachable(down))
    }
}
