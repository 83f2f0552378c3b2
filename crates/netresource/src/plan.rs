//! Desired routing and WireGuard state of a network resource.
//!
//! Pure projections of the directory data; nothing here touches the kernel.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::{IpNet, Ipv4Net};
use netmodel::Peer;
use tracing::debug;

use crate::addressing::overlay_address;

/// A route installed on the WireGuard interface inside the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Net,
    /// `None` routes straight out of the device.
    pub gateway: Option<Ipv4Addr>,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gateway {
            Some(gw) => write!(f, "{} via {gw}", self.destination),
            None => write!(f, "{}", self.destination),
        }
    }
}

/// One `[Peer]` section of the WireGuard configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgPeer {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: Option<String>,
}

/// One route per peer towards its subnet through the peer's overlay address,
/// plus a catch-all for the whole network range.
pub fn plan_routes(peers: &[Peer], ip_range: Ipv4Net) -> Vec<Route> {
    let mut routes = Vec::with_capacity(peers.len() + 1);
    for peer in peers {
        routes.push(Route {
            destination: peer.subnet,
            gateway: Some(overlay_address(peer.subnet).addr()),
        });
    }
    routes.push(Route {
        destination: ip_range,
        gateway: None,
    });
    routes
}

/// One WireGuard peer per directory peer, in the same order.
pub fn plan_peers(peers: &[Peer]) -> Vec<WgPeer> {
    peers
        .iter()
        .map(|peer| {
            debug!(subnet = %peer.subnet, "generate wireguard configuration for peer");
            WgPeer {
                public_key: peer.wg_public_key.clone(),
                allowed_ips: peer.allowed_ips.iter().map(ToString::to_string).collect(),
                endpoint: peer.endpoint().map(String::from),
            }
        })
        .collect()
}

/// Set difference between the addresses on a link and the wanted ones.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddressDiff {
    pub to_add: BTreeSet<IpNet>,
    pub to_remove: BTreeSet<IpNet>,
}

impl AddressDiff {
    pub fn compute(current: &BTreeSet<IpNet>, desired: &BTreeSet<IpNet>) -> Self {
        Self {
            to_add: desired.difference(current).copied().collect(),
            to_remove: current.difference(desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}
