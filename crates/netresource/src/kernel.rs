use std::collections::BTreeSet;

use async_trait::async_trait;
use ipnet::IpNet;

use crate::error::Result;
use crate::plan::Route;
use crate::wireguard::WgConfig;

/// Destination namespace of a link move or veth peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetnsTarget<'a> {
    /// The namespace the agent process itself runs in.
    Host,
    /// A named namespace under `/run/netns`.
    Named(&'a str),
}

/// Outcome of an additive kernel call that tolerates existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Applied,
    AlreadyPresent,
}

/// Namespace lifecycle, plus access to per-namespace sessions.
#[async_trait]
pub trait Kernel: Send + Sync {
    type Session: NamespaceSession;

    async fn namespace_exists(&self, name: &str) -> Result<bool>;
    async fn create_namespace(&self, name: &str) -> Result<()>;
    /// Removes the namespace and every interface inside it.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Session operating on the agent's own namespace.
    async fn host(&self) -> Result<Self::Session>;

    /// Session entered into `name`. Every call made through it observes that
    /// namespace; the namespace is left when the session is dropped.
    ///
    /// Fails with `NamespaceNotFound` when `name` does not exist.
    async fn enter(&self, name: &str) -> Result<Self::Session>;
}

/// Link, address, route and firewall operations scoped to one namespace.
#[async_trait]
pub trait NamespaceSession: Send + Sync {
    async fn link_exists(&self, name: &str) -> Result<bool>;
    async fn create_bridge(&self, name: &str) -> Result<()>;
    async fn create_wireguard(&self, name: &str) -> Result<()>;
    /// Create a veth pair; `name` stays here, `peer` lands in `peer_ns`.
    async fn create_veth(&self, name: &str, peer: &str, peer_ns: NetnsTarget<'_>) -> Result<()>;
    async fn delete_link(&self, name: &str) -> Result<()>;
    async fn set_link_up(&self, name: &str) -> Result<()>;
    async fn set_master(&self, link: &str, bridge: &str) -> Result<()>;
    async fn move_link(&self, name: &str, target: NetnsTarget<'_>) -> Result<()>;

    async fn addr_list(&self, link: &str) -> Result<BTreeSet<IpNet>>;
    async fn addr_add(&self, link: &str, addr: IpNet) -> Result<Change>;
    async fn addr_del(&self, link: &str, addr: IpNet) -> Result<()>;
    async fn route_add(&self, link: &str, route: &Route) -> Result<Change>;

    /// Replace the device configuration (key, port, whole peer set).
    async fn wg_configure(&self, link: &str, config: &WgConfig) -> Result<()>;
    async fn sysctl(&self, key: &str, value: &str) -> Result<()>;
    /// Load an nftables ruleset into this namespace.
    async fn apply_ruleset(&self, ruleset: &str) -> Result<()>;
}
