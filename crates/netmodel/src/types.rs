use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifier of a tenant network, stable for its whole lifetime.
///
/// Every local kernel object name is derived from it, so it is kept short.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetId(String);

impl NetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A tenant private network spanning several nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub net_id: NetId,
    /// Allocation range of the whole network, always an IPv4 /16.
    pub ip_range: Ipv4Net,
    #[serde(default)]
    pub net_resources: Vec<NetResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_points: Vec<AccessPoint>,
}

impl Network {
    /// The part of the network that lives on `node_id`, if any.
    pub fn resource_for(&self, node_id: &str) -> Option<&NetResource> {
        self.net_resources.iter().find(|nr| nr.node_id == node_id)
    }

    /// Check the allocation invariants: a /16 range and every subnet inside it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ip_range.prefix_len() != 16 {
            return Err(ValidationError::RangeNotSlash16 {
                net_id: self.net_id.clone(),
                range: self.ip_range.to_string(),
            });
        }
        for nr in &self.net_resources {
            if !self.ip_range.contains(&nr.subnet) {
                return Err(ValidationError::SubnetOutsideRange {
                    node_id: nr.node_id.clone(),
                    subnet: nr.subnet.to_string(),
                    range: self.ip_range.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The slice of a [`Network`] local to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetResource {
    pub node_id: String,
    #[serde(default)]
    pub pub_endpoints: Vec<IpAddr>,
    /// Carved from the network range, normally a /24.
    pub subnet: Ipv4Net,
    #[serde(default)]
    pub wg_private_key: String,
    #[serde(default)]
    pub wg_public_key: String,
    pub wg_listen_port: u16,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

/// Another node's segment of the same network, as seen from this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub subnet: Ipv4Net,
    pub wg_public_key: String,
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// `host:port`; absent for nodes without a public address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Peer {
    /// Reachability endpoint, treating an empty string as "none".
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|e| !e.is_empty())
    }
}

/// A node routing an external subnet into the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub node_id: String,
    pub subnet: IpNet,
    pub wg_public_key: String,
}

/// Result of joining a namespace to a network. Built per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub namespace: String,
    pub ipv4: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
}
