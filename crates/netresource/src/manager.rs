//! Network resource lifecycle.
//!
//! ```text
//!        host namespace                     n-<id>
//!  ┌──────────────────────────┐   ┌──────────────────────────────┐
//!  │                          │   │                              │
//!  │   b-<id> ── v-<id> ──────┼───┼── nr-<id12>   x.y.z.1/24     │
//!  │   (bridge)   (veth)      │   │                              │
//!  │                          │   │   w-<id>  100.64.z.w/16      │
//!  └──────────────────────────┘   │   routes: peer subnets via   │
//!                                 │   their overlay address,     │
//!                                 │   network /16 via w-<id>     │
//!                                 └──────────────────────────────┘
//! ```
//!
//! State is never stored: every step inspects the kernel, creates what is
//! missing and re-asserts the attributes of what exists, so `create` is the
//! recovery path after a partial failure and callers simply retry it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use netmodel::{NetId, NetResource};
use tracing::{debug, error, info, warn};

use crate::addressing::{gateway_address, overlay_address};
use crate::error::{NetworkError, Result};
use crate::firewall::default_ruleset;
use crate::kernel::{Change, Kernel, NamespaceSession, NetnsTarget};
use crate::naming::ResourceNames;
use crate::plan::{AddressDiff, plan_peers, plan_routes};
use crate::wireguard::WgConfig;

/// Stale addresses found on the WireGuard link are only reported. Removing
/// them would also strip addresses set by other tooling.
pub const RETRACT_STALE_ADDRESSES: bool = false;

/// Lifecycle state as observed in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Neither bridge nor namespace exists.
    Absent,
    /// Kernel objects exist but the tunnel has no overlay address yet.
    Created,
    /// The WireGuard link carries its overlay address.
    Configured,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Created => f.write_str("created"),
            Self::Configured => f.write_str("configured"),
        }
    }
}

/// Drives one network resource of one node.
///
/// Performs no locking: calls for the same network id must be serialized by
/// the caller.
pub struct NetResourceManager<K: Kernel> {
    kernel: Arc<K>,
    id: NetId,
    resource: NetResource,
    ip_range: Ipv4Net,
    names: ResourceNames,
}

impl<K: Kernel> NetResourceManager<K> {
    /// Fails with [`NetworkError::NameTooLong`] when the id yields a kernel
    /// name over the interface-name limit.
    pub fn new(kernel: Arc<K>, id: NetId, resource: NetResource, ip_range: Ipv4Net) -> Result<Self> {
        let names = ResourceNames::derive(&id)?;
        Ok(Self {
            kernel,
            id,
            resource,
            ip_range,
            names,
        })
    }

    pub fn id(&self) -> &NetId {
        &self.id
    }

    pub fn bridge_name(&self) -> &str {
        &self.names.bridge
    }

    pub fn namespace(&self) -> &str {
        &self.names.namespace
    }

    pub fn wg_name(&self) -> &str {
        &self.names.wireguard
    }

    pub fn veth_name(&self) -> &str {
        &self.names.veth
    }

    /// Overlay address the WireGuard link should carry.
    pub fn overlay_address(&self) -> Ipv4Net {
        overlay_address(self.resource.subnet)
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Set up bridge, namespace, veth pair, WireGuard link and firewall.
    ///
    /// With `public_ns`, the WireGuard link is created inside that namespace
    /// so its socket binds to the public address, then moved to the host and
    /// finally into the resource namespace.
    pub async fn create(&self, public_ns: Option<&str>) -> Result<()> {
        debug!(
            net_id = %self.id,
            subnet = %self.resource.subnet,
            peers = self.resource.peers.len(),
            "create network resource"
        );

        let host = self.kernel.host().await?;
        self.create_bridge(&host).await?;
        self.create_namespace().await?;
        self.create_veth_pair(&host).await?;
        self.create_wireguard(&host, public_ns).await?;
        self.apply_firewall().await?;
        Ok(())
    }

    async fn create_bridge(&self, host: &K::Session) -> Result<()> {
        let name = self.bridge_name();
        if !host.link_exists(name).await? {
            host.create_bridge(name).await?;
        }
        host.sysctl(&format!("net.ipv6.conf.{name}.disable_ipv6"), "1")
            .await?;
        host.set_link_up(name).await
    }

    async fn create_namespace(&self) -> Result<()> {
        let name = self.namespace();
        if self.kernel.namespace_exists(name).await? {
            return Ok(());
        }
        info!(namespace = %name, "creating namespace");
        self.kernel.create_namespace(name).await
    }

    /// Veth pair between the namespace and the bridge. The namespace end
    /// carries the subnet gateway address.
    async fn create_veth_pair(&self, host: &K::Session) -> Result<()> {
        let bridge = self.bridge_name();
        let host_veth = &self.names.host_veth;
        let nr_veth = self.veth_name();

        if !host.link_exists(bridge).await? {
            return Err(NetworkError::BridgeNotFound(bridge.to_string()));
        }

        let netns = self.kernel.enter(self.namespace()).await?;
        netns.sysctl("net.ipv6.conf.all.forwarding", "1").await?;
        netns.set_link_up("lo").await?;

        let mut have_pair = netns.link_exists(nr_veth).await?;
        if have_pair && !host.link_exists(host_veth).await? {
            warn!(veth = %nr_veth, "veth found without its host end, recreating");
            netns.delete_link(nr_veth).await?;
            have_pair = false;
        }
        if !have_pair {
            info!(
                namespace = %self.namespace(),
                veth = %nr_veth,
                "creating veth pair in network namespace"
            );
            netns
                .create_veth(nr_veth, host_veth, NetnsTarget::Host)
                .await?;
        }

        // Attributes are re-asserted on every call so a run interrupted
        // after creating the pair still converges.
        let gateway = gateway_address(self.resource.subnet);
        match netns.addr_add(nr_veth, IpNet::V4(gateway)).await? {
            Change::Applied => info!(addr = %gateway, "set address on veth interface"),
            Change::AlreadyPresent => debug!(addr = %gateway, "veth address already present"),
        }
        netns.set_link_up(nr_veth).await?;
        drop(netns);

        host.sysctl(&format!("net.ipv6.conf.{host_veth}.disable_ipv6"), "1")
            .await?;
        debug!(
            veth = %nr_veth,
            host_veth = %host_veth,
            bridge = %bridge,
            "attaching veth to bridge"
        );
        host.set_master(host_veth, bridge).await?;
        host.set_link_up(host_veth).await?;
        Ok(())
    }

    async fn create_wireguard(&self, host: &K::Session, public_ns: Option<&str>) -> Result<()> {
        let wg = self.wg_name();
        let ns = self.namespace();

        let netns = self.kernel.enter(ns).await?;
        if netns.link_exists(wg).await? {
            return Ok(());
        }
        drop(netns);

        if host.link_exists(wg).await? {
            // Left behind by an interrupted run; only the final move is missing.
            warn!(wg = %wg, "wireguard interface found in host namespace");
        } else if let Some(public) = public_ns {
            let pub_session = self.kernel.enter(public).await?;
            info!(wg = %wg, namespace = %public, "creating wireguard interface in public namespace");
            pub_session.create_wireguard(wg).await?;
            info!(wg = %wg, "moving wireguard into host namespace");
            pub_session.move_link(wg, NetnsTarget::Host).await?;
        } else {
            info!(wg = %wg, "creating wireguard interface in host namespace");
            host.create_wireguard(wg).await?;
        }

        info!(wg = %wg, namespace = %ns, "moving wireguard into network resource namespace");
        host.move_link(wg, NetnsTarget::Named(ns)).await
    }

    async fn apply_firewall(&self) -> Result<()> {
        let netns = self.kernel.enter(self.namespace()).await?;
        netns.apply_ruleset(default_ruleset()).await
    }

    // -----------------------------------------------------------------------
    // ConfigureWG
    // -----------------------------------------------------------------------

    /// Converge the WireGuard link: key, port, peers, overlay address, routes.
    ///
    /// Routes are applied independently: a failing route is logged and the
    /// remaining ones are still added. The first route failure is returned
    /// once all of them were attempted.
    pub async fn configure_wg(&self, private_key: &str) -> Result<()> {
        let routes = plan_routes(&self.resource.peers, self.ip_range);
        let config = WgConfig {
            private_key: private_key.to_string(),
            listen_port: self.resource.wg_listen_port,
            peers: plan_peers(&self.resource.peers),
        };
        let desired: BTreeSet<IpNet> = [IpNet::V4(self.overlay_address())].into();
        let wg = self.wg_name();

        let netns = self.kernel.enter(self.namespace()).await?;
        if !netns.link_exists(wg).await? {
            return Err(NetworkError::LinkNotFound(wg.to_string()));
        }

        netns.wg_configure(wg, &config).await?;
        netns.set_link_up(wg).await?;

        let current = netns.addr_list(wg).await?;
        let diff = AddressDiff::compute(&current, &desired);
        info!(
            wg = %wg,
            current = ?current,
            to_add = ?diff.to_add,
            to_remove = ?diff.to_remove,
            "wireguard addresses"
        );

        for addr in &diff.to_add {
            debug!(ip = %addr, "set ip on wireguard interface");
            netns.addr_add(wg, *addr).await?;
        }
        for addr in &diff.to_remove {
            if RETRACT_STALE_ADDRESSES {
                debug!(ip = %addr, "unset ip on wireguard interface");
                netns.addr_del(wg, *addr).await?;
            } else {
                debug!(ip = %addr, "stale address on wireguard interface left in place");
            }
        }

        let mut first_failure = None;
        for route in &routes {
            match netns.route_add(wg, route).await {
                Ok(Change::Applied) => debug!(route = %route, "route added"),
                Ok(Change::AlreadyPresent) => debug!(route = %route, "route already present"),
                Err(e) => {
                    error!(route = %route, error = %e, "failed to set route");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove the bridge and the namespace (and with it every link inside).
    ///
    /// Both steps always run; missing objects are skipped. The first failure
    /// is returned after both were attempted.
    pub async fn delete(&self) -> Result<()> {
        remove_resource(self.kernel.as_ref(), &self.names)
            .await
            .map(|_| ())
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Read from the kernel how far this resource got.
    pub async fn state(&self) -> Result<ResourceState> {
        let host = self.kernel.host().await?;
        let bridge = host.link_exists(self.bridge_name()).await?;
        let namespace = self.kernel.namespace_exists(self.namespace()).await?;
        if !bridge && !namespace {
            return Ok(ResourceState::Absent);
        }
        if !namespace {
            return Ok(ResourceState::Created);
        }

        let netns = self.kernel.enter(self.namespace()).await?;
        let wg = self.wg_name();
        if !netns.link_exists(wg).await? {
            return Ok(ResourceState::Created);
        }
        let overlay = IpNet::V4(self.overlay_address());
        if netns.addr_list(wg).await?.contains(&overlay) {
            Ok(ResourceState::Configured)
        } else {
            Ok(ResourceState::Created)
        }
    }
}

impl<K: Kernel> fmt::Debug for NetResourceManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetResourceManager")
            .field("id", &self.id)
            .field("subnet", &self.resource.subnet)
            .field("ip_range", &self.ip_range)
            .field("peers", &self.resource.peers.len())
            .finish()
    }
}

/// Remove the bridge and namespace named by `names`. Only the names are
/// needed, so resources can be torn down without their network definition.
///
/// Returns whether anything was present.
pub(crate) async fn remove_resource<K: Kernel>(kernel: &K, names: &ResourceNames) -> Result<bool> {
    let bridge = names.bridge.as_str();
    let ns = names.namespace.as_str();

    let bridge_result = async {
        let host = kernel.host().await?;
        if !host.link_exists(bridge).await? {
            return Ok(false);
        }
        info!(bridge = %bridge, "deleting bridge");
        host.delete_link(bridge).await?;
        Ok::<bool, NetworkError>(true)
    }
    .await;
    if let Err(e) = &bridge_result {
        error!(bridge = %bridge, error = %e, "failed to delete network resource bridge");
    }

    let ns_result = async {
        if !kernel.namespace_exists(ns).await? {
            return Ok(false);
        }
        info!(namespace = %ns, "deleting namespace");
        kernel.delete_namespace(ns).await?;
        Ok::<bool, NetworkError>(true)
    }
    .await;
    if let Err(e) = &ns_result {
        error!(namespace = %ns, error = %e, "failed to delete network resource namespace");
    }

    Ok(bridge_result? | ns_result?)
}
