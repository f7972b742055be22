//! Public network checks used when choosing access and gateway nodes

use crate::error::{NodeError, Result};
use crate::gateway::NodeGateway;
use std::net::IpAddr;

/// Interface carrying the node's own addresses
pub const ZOS_INTERFACE: &str = "zos";

/// True for addresses routable on the public internet
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            let link_local = first & 0xffc0 == 0xfe80;
            let unique_local = first & 0xfe00 == 0xfc00;
            !(v6.is_loopback() || v6.is_unspecified() || v6.is_multicast() || link_local || unique_local)
        }
    }
}

/// Ensure the node has a public IPv4 configured
pub async fn validate_public_node(gateway: &dyn NodeGateway) -> Result<()> {
    let config = gateway.get_public_config().await?;
    let ipv4 = config
        .ipv4
        .ok_or_else(|| NodeError::InvalidConfig("node has no public ipv4".to_string()))?;
    if !ipv4.ip.is_ipv4() || !is_public_ip(&ipv4.ip) {
        return Err(NodeError::InvalidConfig(format!(
            "public ipv4 {} is not routable",
            ipv4
        )));
    }
    Ok(())
}

/// Address peers should use to reach the node.
///
/// Prefers the public config's IPv4, then the first public IPv4 on the
/// `zos` interface, then the first public IPv6 there.
pub async fn node_endpoint(gateway: &dyn NodeGateway) -> Result<IpAddr> {
    if let Ok(config) = gateway.get_public_config().await {
        if let Some(ipv4) = config.ipv4 {
            if is_public_ip(&ipv4.ip) {
                return Ok(ipv4.ip);
            }
        }
    }

    let interfaces = gateway.list_interfaces().await?;
    let ips = interfaces
        .get(ZOS_INTERFACE)
        .ok_or_else(|| NodeError::InvalidConfig("node has no zos interface".to_string()))?;

    ips.iter()
        .find(|ip| ip.is_ipv4() && is_public_ip(ip))
        .or_else(|| ips.iter().find(|ip| ip.is_ipv6() && is_public_ip(ip)))
        .copied()
        .ok_or_else(|| NodeError::InvalidConfig("no public endpoint on zos interface".to_string()))
}
