//! Gateway workload payloads

use serde::{Deserialize, Serialize};

/// Data of a `gateway-name-proxy` workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxyData {
    /// Registered name; the node derives the FQDN from it
    pub name: String,

    /// Pass TLS traffic through instead of terminating it
    #[serde(default)]
    pub tls_passthrough: bool,

    /// Backend urls
    #[serde(default)]
    pub backends: Vec<String>,
}

/// Result data reported by a node for gateway workloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayProxyResult {
    #[serde(default)]
    pub fqdn: String,
}
