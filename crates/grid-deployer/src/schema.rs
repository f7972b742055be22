//! Explicit key/value mapping for configuration-facing types
//!
//! Each type spells out its own pair of pure functions to and from a
//! generic key/value tree. Keys are snake_case; maps keyed by node use the
//! node number as a string key.

use crate::error::{DeployError, Result};
use crate::gateway::{GatewayNameProxy, GatewayNameState};
use grid_types::{ContractId, NodeContracts, NodeId};
use serde_json::Value;

/// Generic key/value tree
pub type KvMap = serde_json::Map<String, Value>;

/// Bidirectional mapping between a type and a [`KvMap`]
pub trait KvMapping: Sized {
    fn to_kv(&self) -> KvMap;

    fn from_kv(kv: &KvMap) -> Result<Self>;
}

fn mismatch(key: &str, expected: &str) -> DeployError {
    DeployError::Schema(format!("field `{}`: expected {}", key, expected))
}

fn required<'a>(kv: &'a KvMap, key: &str) -> Result<&'a Value> {
    kv.get(key)
        .ok_or_else(|| DeployError::Schema(format!("missing field `{}`", key)))
}

fn as_str(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(key, "string"))
}

fn as_u64(key: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| mismatch(key, "unsigned integer"))
}

fn opt_str(kv: &KvMap, key: &str) -> Result<String> {
    kv.get(key)
        .map_or(Ok(String::new()), |value| as_str(key, value))
}

fn opt_bool(kv: &KvMap, key: &str) -> Result<bool> {
    match kv.get(key) {
        None => Ok(false),
        Some(value) => value.as_bool().ok_or_else(|| mismatch(key, "bool")),
    }
}

fn opt_u64(kv: &KvMap, key: &str) -> Result<u64> {
    kv.get(key).map_or(Ok(0), |value| as_u64(key, value))
}

fn opt_str_list(kv: &KvMap, key: &str) -> Result<Vec<String>> {
    match kv.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(|item| as_str(key, item)).collect(),
        Some(_) => Err(mismatch(key, "list of strings")),
    }
}

fn opt_map<'a>(kv: &'a KvMap, key: &str) -> Result<Option<&'a KvMap>> {
    match kv.get(key) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(mismatch(key, "map")),
    }
}

fn node_id(key: &str, value: &Value) -> Result<NodeId> {
    let id = as_u64(key, value)?;
    u32::try_from(id)
        .map(NodeId::new)
        .map_err(|_| mismatch(key, "node id"))
}

fn node_contracts_to_kv(contracts: &NodeContracts) -> KvMap {
    contracts
        .iter()
        .map(|(node, contract)| (node.value().to_string(), Value::from(contract.value())))
        .collect()
}

fn node_contracts_from_kv(key: &str, kv: &KvMap) -> Result<NodeContracts> {
    kv.iter()
        .map(|(node, contract)| {
            let node = node
                .parse::<u32>()
                .map_err(|_| mismatch(key, "map keyed by node id"))?;
            Ok((NodeId::new(node), ContractId::new(as_u64(key, contract)?)))
        })
        .collect()
}

impl KvMapping for GatewayNameProxy {
    fn to_kv(&self) -> KvMap {
        let mut kv = KvMap::new();
        kv.insert("name".into(), Value::from(self.name.clone()));
        kv.insert("tls_passthrough".into(), Value::from(self.tls_passthrough));
        kv.insert("backends".into(), Value::from(self.backends.clone()));
        kv.insert("description".into(), Value::from(self.description.clone()));
        kv.insert("fqdn".into(), Value::from(self.fqdn.clone()));
        kv
    }

    fn from_kv(kv: &KvMap) -> Result<Self> {
        Ok(Self {
            name: as_str("name", required(kv, "name")?)?,
            tls_passthrough: opt_bool(kv, "tls_passthrough")?,
            backends: opt_str_list(kv, "backends")?,
            description: opt_str(kv, "description")?,
            fqdn: opt_str(kv, "fqdn")?,
        })
    }
}

impl KvMapping for GatewayNameState {
    fn to_kv(&self) -> KvMap {
        let mut kv = KvMap::new();
        kv.insert("id".into(), Value::from(self.id.clone()));
        kv.insert("node".into(), Value::from(self.node.value()));
        kv.insert("gw".into(), Value::Object(self.gw.to_kv()));
        kv.insert(
            "node_deployment_id".into(),
            Value::Object(node_contracts_to_kv(&self.node_deployment_id)),
        );
        kv.insert(
            "name_contract_id".into(),
            Value::from(self.name_contract_id.value()),
        );
        kv
    }

    fn from_kv(kv: &KvMap) -> Result<Self> {
        let gw = match opt_map(kv, "gw")? {
            Some(gw) => GatewayNameProxy::from_kv(gw)?,
            None => GatewayNameProxy::default(),
        };
        let node_deployment_id = match opt_map(kv, "node_deployment_id")? {
            Some(map) => node_contracts_from_kv("node_deployment_id", map)?,
            None => NodeContracts::new(),
        };
        Ok(Self {
            id: opt_str(kv, "id")?,
            node: node_id("node", required(kv, "node")?)?,
            gw,
            node_deployment_id,
            name_contract_id: ContractId::new(opt_u64(kv, "name_contract_id")?),
        })
    }
}
