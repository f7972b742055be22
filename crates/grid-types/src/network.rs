//! Node network introspection types

use crate::error::{Result, TypesError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// An address with its prefix length, e.g. `50.50.50.50/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    pub ip: IpAddr,
    pub prefix_len: u8,
}

impl IpNet {
    pub fn new(ip: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(TypesError::InvalidIpNet {
                input: format!("{}/{}", ip, prefix_len),
                reason: format!("prefix length must be at most {}", max),
            });
        }
        Ok(Self { ip, prefix_len })
    }
}

impl FromStr for IpNet {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| TypesError::InvalidIpNet {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let (ip, prefix) = s.split_once('/').ok_or_else(|| invalid("missing '/'"))?;
        let ip: IpAddr = ip.parse().map_err(|_| invalid("bad address"))?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid("bad prefix"))?;
        IpNet::new(ip, prefix_len)
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

impl Serialize for IpNet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How the public interface of a node is attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfaceType {
    #[default]
    Vlan,
    Macvlan,
}

/// Configuration of the node interface connected to the public internet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    #[serde(rename = "type", default)]
    pub iface_type: IfaceType,

    #[serde(default)]
    pub ipv4: Option<IpNet>,

    #[serde(default)]
    pub ipv6: Option<IpNet>,

    #[serde(default)]
    pub gw4: Option<IpAddr>,

    #[serde(default)]
    pub gw6: Option<IpAddr>,

    /// Node domain, e.g. `gent01.devnet.grid.tf`
    #[serde(default)]
    pub domain: String,
}

/// Software versions running on a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemVersion {
    pub zos: String,
    pub zinit: String,
}

/// Resource amounts on a node: cores, ssd, hdd and memory bytes, public IPs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    #[serde(default)]
    pub cru: u64,
    #[serde(default)]
    pub sru: u64,
    #[serde(default)]
    pub hru: u64,
    #[serde(default)]
    pub mru: u64,
    #[serde(default)]
    pub ipv4u: u64,
}

/// Node statistics: total capacity and the part reserved by deployments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: Capacity,
    pub used: Capacity,
}

impl Counters {
    /// Capacity still free; saturates at zero
    pub fn available(&self) -> Capacity {
        Capacity {
            cru: self.total.cru.saturating_sub(self.used.cru),
            sru: self.total.sru.saturating_sub(self.used.sru),
            hru: self.total.hru.saturating_sub(self.used.hru),
            mru: self.total.mru.saturating_sub(self.used.mru),
            ipv4u: self.total.ipv4u.saturating_sub(self.used.ipv4u),
        }
    }
}

/// Hardware description decoded by `dmidecode` on the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dmi {
    #[serde(default)]
    pub tooling: DmiTooling,
    #[serde(default)]
    pub sections: Vec<DmiSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmiTooling {
    #[serde(default)]
    pub aggregator: String,
    #[serde(default)]
    pub decoder: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmiSection {
    #[serde(rename = "handleline", default)]
    pub handle_line: String,
    #[serde(rename = "typestr", default)]
    pub type_str: String,
    #[serde(rename = "subsections", default)]
    pub sub_sections: Vec<DmiSubSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmiSubSection {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Dmi {
    /// First section of the given type, e.g. `"System"`
    pub fn section(&self, type_str: &str) -> Option<&DmiSection> {
        self.sections.iter().find(|s| s.type_str == type_str)
    }
}
