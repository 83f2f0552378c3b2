//! Materializes a node's slice of a tenant overlay network in the kernel.
//!
//! [`NetResourceManager`] owns the lifecycle of one network resource,
//! [`Networker`] applies whole [`netmodel::Network`]s for the local node.
//! Kernel access goes through the [`Kernel`] trait; [`SystemKernel`] is the
//! implementation backed by iproute2, wireguard-tools and nftables.

mod addressing;
mod command;
mod error;
mod firewall;
mod kernel;
mod manager;
mod naming;
mod netns;
mod networker;
mod plan;
mod prerequisites;
mod system;
#[cfg(test)]
mod testing;
mod wireguard;

pub use addressing::{gateway_address, overlay_address};
pub use command::CommandError;
pub use error::{NetworkError, Result};
pub use firewall::default_ruleset;
pub use kernel::{Change, Kernel, NamespaceSession, NetnsTarget};
pub use manager::{NetResourceManager, RETRACT_STALE_ADDRESSES, ResourceState};
pub use naming::{
    MAX_IFNAME_LEN, ResourceNames, bridge_name, host_veth_name, member_namespace_name,
    member_veth_name, namespace_name, veth_name, wireguard_name,
};
pub use netns::{NETNS_RUN_DIR, NetnsGuard, NetnsWorker, netns_path};
pub use networker::{MEMBER_IFACE, Networker, NetworkerConfig};
pub use plan::{AddressDiff, Route, WgPeer, plan_peers, plan_routes};
pub use prerequisites::{REQUIRED_COMMANDS, check_prerequisites};
pub use system::{SystemKernel, SystemSession};
pub use wireguard::WgConfig;
