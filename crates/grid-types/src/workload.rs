//! Workloads - individual resource requests inside a deployment

use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload variant selector of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadType {
    /// Private network (wireguard overlay)
    Network,
    /// Virtual machine
    #[serde(rename = "zmachine")]
    Machine,
    /// Disk mount
    #[serde(rename = "zmount")]
    Mount,
    /// Public ip reservation
    #[serde(rename = "ip")]
    PublicIp,
    /// 0-db namespace
    Zdb,
    /// Gateway proxy addressed by a registered name
    GatewayNameProxy,
    /// Gateway proxy addressed by a fully qualified domain name
    GatewayFqdnProxy,
    /// Quantum safe filesystem
    #[serde(rename = "qsfs")]
    QuantumSafeFs,
    /// Log forwarding for a machine
    #[serde(rename = "zlogs")]
    Logs,
}

impl WorkloadType {
    /// Stable tag used on the wire and in fingerprints
    pub fn tag(&self) -> &'static str {
        match self {
            WorkloadType::Network => "network",
            WorkloadType::Machine => "zmachine",
            WorkloadType::Mount => "zmount",
            WorkloadType::PublicIp => "ip",
            WorkloadType::Zdb => "zdb",
            WorkloadType::GatewayNameProxy => "gateway-name-proxy",
            WorkloadType::GatewayFqdnProxy => "gateway-fqdn-proxy",
            WorkloadType::QuantumSafeFs => "qsfs",
            WorkloadType::Logs => "zlogs",
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Execution state reported by the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    #[default]
    Pending,
    Ok,
    Error,
    Deleted,
}

impl ResultState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, ResultState::Deleted)
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultState::Pending => write!(f, "pending"),
            ResultState::Ok => write!(f, "ok"),
            ResultState::Error => write!(f, "error"),
            ResultState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Execution result of a workload, written by the node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub state: ResultState,

    /// Type-specific result payload (e.g. the assigned FQDN of a gateway)
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkloadResult {
    pub fn with_state(state: ResultState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }
}

/// One resource request inside a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Unique within its deployment
    pub name: String,

    #[serde(rename = "type")]
    pub workload_type: WorkloadType,

    /// Opaque type-specific payload
    pub data: serde_json::Value,

    #[serde(default)]
    pub description: String,

    /// Version at which this workload last changed
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub result: WorkloadResult,
}

impl Workload {
    pub fn new(
        name: impl Into<String>,
        workload_type: WorkloadType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            workload_type,
            data,
            description: String::new(),
            version: 0,
            result: WorkloadResult::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Same caller-controlled content, ignoring version and result.
    pub fn same_content(&self, other: &Workload) -> bool {
        self.name == other.name
            && self.workload_type == other.workload_type
            && self.data == other.data
            && self.description == other.description
    }

    pub fn is_deleted(&self) -> bool {
        self.result.state.is_deleted()
    }
}
