//! Grid Node - Node gateway for remote compute nodes
//!
//! Every node is reachable only through an asynchronous message bus. This
//! crate defines the capability interface the reconciliation engine consumes
//! ([`NodeGateway`]) and two implementations of it:
//!
//! - [`RmbNodeClient`]: request/response calls over a [`MessageBus`]
//! - [`InMemoryNodeGateway`]: an in-process node for development and tests
//!
//! It also carries the public-network checks used to pick access nodes.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod bus;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod network;
pub mod rmb;

// Re-exports
pub use bus::{BusError, MessageBus};
pub use error::{NodeError, Result};
pub use gateway::NodeGateway;
pub use memory::{InMemoryNodeGateway, NodeOp};
pub use network::{is_public_ip, node_endpoint, validate_public_node};
pub use rmb::RmbNodeClient;
