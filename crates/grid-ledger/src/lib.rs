//! Grid Ledger - Contract ledger interface
//!
//! Every node deployment is authorized by a node contract that records the
//! fingerprint of the deployment's content. Gateway names are reserved
//! through name contracts. The ledger is external; this crate defines the
//! operations the engine needs from it ([`ContractLedger`]) and an
//! in-memory implementation ([`InMemoryLedger`]).

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod contract;
pub mod error;
pub mod ledger;
pub mod memory;

// Re-exports
pub use contract::{AccountInfo, Contract, ContractKind, ContractState, NodeInfo, TwinInfo};
pub use error::{LedgerError, Result};
pub use ledger::ContractLedger;
pub use memory::{InMemoryLedger, LedgerOp};
