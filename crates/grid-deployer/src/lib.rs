//! Grid Deployer - Deployment reconciliation engine
//!
//! Keeps three sources of truth consistent: the caller's desired per-node
//! deployments, the per-node contracts recorded on the ledger, and the
//! deployments actually living on each node.
//!
//! # Flow
//!
//! 1. [`planner::plan`] classifies every node into create, update, delete
//!    or unchanged by comparing deployment fingerprints
//! 2. [`Reconciler::apply`](orchestrator::Reconciler) executes the plan
//!    bucket by bucket and compensates already-mutated nodes when any node
//!    fails
//! 3. [`Deployer::sync`] pulls ledger validity and workload results back
//!    into the caller's view
//!
//! Workload-kind deployers such as [`GatewayNameDeployer`] build desired
//! deployments and drive the engine through the [`Deployer`] trait.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
mod deadline;
pub mod error;
pub mod gateway;
pub mod liveness;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod schema;
pub mod sync;
pub mod telemetry;
pub mod version;

// Re-exports
pub use config::{DeployerConfig, LoggingConfig};
pub use error::{
    BatchFailure, Compensation, CompensationOutcome, DeployError, NodeFailure, Result, Step,
};
pub use gateway::{GatewayNameDeployer, GatewayNameProxy, GatewayNameState};
pub use liveness::are_nodes_up;
pub use orchestrator::{Deployer, Reconciler};
pub use planner::{plan, Action, Deployments, Plan};
pub use pool::{NodeClientPool, RmbNodeClientPool, StaticNodePool};
pub use schema::{KvMap, KvMapping};
pub use sync::{merge_results, sync_contracts};
pub use version::assign_versions;
