//! Node-level entry point: applies whole networks and attaches members.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use netmodel::{Member, NetId, NetResource, Network};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::addressing::gateway_address;
use crate::error::{NetworkError, Result};
use crate::kernel::{Kernel, NamespaceSession, NetnsTarget};
use crate::manager::{NetResourceManager, ResourceState, remove_resource};
use crate::naming::{ResourceNames, member_namespace_name, member_veth_name};
use crate::plan::{AddressDiff, Route};

/// Interface name of the veth end inside a member namespace.
pub const MEMBER_IFACE: &str = "eth0";

#[derive(Debug, Clone)]
pub struct NetworkerConfig {
    /// Identity of this node in the directory.
    pub node_id: String,
    /// Namespace holding the node's public address, if any.
    pub public_namespace: Option<String>,
}

/// Applies networks to the local node and serializes work per network id.
pub struct Networker<K: Kernel> {
    kernel: Arc<K>,
    config: NetworkerConfig,
    locks: Mutex<HashMap<NetId, Arc<Mutex<()>>>>,
}

impl<K: Kernel> Networker<K> {
    pub fn new(kernel: Arc<K>, config: NetworkerConfig) -> Self {
        Self {
            kernel,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    async fn lock(&self, id: &NetId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted network unless another call is
    /// already waiting on it.
    async fn forget(&self, id: &NetId, guard: OwnedMutexGuard<()>) {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(id)
            && Arc::ptr_eq(lock, OwnedMutexGuard::mutex(&guard))
            && Arc::strong_count(lock) == 2
        {
            locks.remove(id);
        }
    }

    fn local_resource<'a>(&self, network: &'a Network) -> Result<&'a NetResource> {
        network
            .resource_for(&self.config.node_id)
            .ok_or_else(|| NetworkError::NoLocalResource {
                net_id: network.net_id.clone(),
                node_id: self.config.node_id.clone(),
            })
    }

    fn manager(&self, network: &Network) -> Result<NetResourceManager<K>> {
        network.validate()?;
        let resource = self.local_resource(network)?;
        NetResourceManager::new(
            Arc::clone(&self.kernel),
            network.net_id.clone(),
            resource.clone(),
            network.ip_range,
        )
    }

    /// Create and configure the local resource of `network`. Returns the
    /// namespace workloads of this network live in.
    pub async fn apply(&self, network: &Network) -> Result<String> {
        let nr = self.manager(network)?;
        let private_key = self.local_resource(network)?.wg_private_key.clone();

        let _guard = self.lock(&network.net_id).await;
        nr.create(self.config.public_namespace.as_deref()).await?;
        nr.configure_wg(&private_key).await?;
        info!(net_id = %network.net_id, namespace = %nr.namespace(), "network resource applied");
        Ok(nr.namespace().to_string())
    }

    /// Tear down the local resource of `network`.
    pub async fn delete(&self, network: &Network) -> Result<()> {
        self.manager(network)?;
        self.delete_by_id(&network.net_id).await?;
        Ok(())
    }

    /// Tear down whatever the kernel holds for `id`, without its network
    /// definition. Returns whether anything was present.
    pub async fn delete_by_id(&self, id: &NetId) -> Result<bool> {
        let names = ResourceNames::derive(id)?;
        let guard = self.lock(id).await;
        let removed = remove_resource(self.kernel.as_ref(), &names).await?;
        self.forget(id, guard).await;
        if removed {
            info!(net_id = %id, "network resource deleted");
        }
        Ok(removed)
    }

    pub async fn state(&self, network: &Network) -> Result<ResourceState> {
        let nr = self.manager(network)?;
        let _guard = self.lock(&network.net_id).await;
        nr.state().await
    }

    /// Attach a new isolated namespace named `member_id` to the network
    /// bridge, with the first of `addrs` as its address.
    pub async fn join(
        &self,
        network: &Network,
        member_id: &str,
        addrs: &[Ipv4Addr],
    ) -> Result<Member> {
        let subnet = self.local_resource(network)?.subnet;
        let names = ResourceNames::derive(&network.net_id)?;
        let namespace = member_namespace_name(member_id)?;
        let host_veth = member_veth_name(member_id)?;
        let ip = member_address(subnet, addrs)?;

        let _guard = self.lock(&network.net_id).await;
        let host = self.kernel.host().await?;
        if !host.link_exists(&names.bridge).await? {
            return Err(NetworkError::BridgeNotFound(names.bridge));
        }

        if !self.kernel.namespace_exists(&namespace).await? {
            info!(namespace = %namespace, "creating member namespace");
            self.kernel.create_namespace(&namespace).await?;
        }

        let netns = self.kernel.enter(&namespace).await?;
        if !netns.link_exists(MEMBER_IFACE).await? {
            netns.set_link_up("lo").await?;
            netns
                .create_veth(MEMBER_IFACE, &host_veth, NetnsTarget::Host)
                .await?;
        }
        let current = netns.addr_list(MEMBER_IFACE).await?;
        let desired: BTreeSet<IpNet> = [IpNet::V4(ip)].into();
        let diff = AddressDiff::compute(&current, &desired);
        for addr in &diff.to_add {
            netns.addr_add(MEMBER_IFACE, *addr).await?;
        }
        // IPv6 link-local addresses stay.
        for addr in diff.to_remove.iter().filter(|a| matches!(a, IpNet::V4(_))) {
            info!(namespace = %namespace, ip = %addr, "replacing member address");
            netns.addr_del(MEMBER_IFACE, *addr).await?;
        }
        netns.set_link_up(MEMBER_IFACE).await?;
        let default_route = Route {
            destination: Ipv4Net::default(),
            gateway: Some(gateway_address(subnet).addr()),
        };
        netns.route_add(MEMBER_IFACE, &default_route).await?;
        drop(netns);

        host.sysctl(&format!("net.ipv6.conf.{host_veth}.disable_ipv6"), "1")
            .await?;
        host.set_master(&host_veth, &names.bridge).await?;
        host.set_link_up(&host_veth).await?;

        info!(net_id = %network.net_id, namespace = %namespace, ip = %ip, "member joined");
        Ok(Member {
            namespace,
            ipv4: ip.addr(),
            ipv6: None,
        })
    }

    /// Remove a member namespace created by [`join`](Self::join).
    pub async fn leave(&self, net_id: &NetId, member_id: &str) -> Result<()> {
        let namespace = member_namespace_name(member_id)?;
        let _guard = self.lock(net_id).await;
        if self.kernel.namespace_exists(&namespace).await? {
            info!(net_id = %net_id, namespace = %namespace, "deleting member namespace");
            self.kernel.delete_namespace(&namespace).await?;
        }
        Ok(())
    }

    /// Addresses of `iface`, looked up inside `netns` when given.
    pub async fn addrs(&self, iface: &str, netns: Option<&str>) -> Result<Vec<IpAddr>> {
        let session = match netns {
            Some(name) => self.kernel.enter(name).await?,
            None => self.kernel.host().await?,
        };
        if !session.link_exists(iface).await? {
            return Err(NetworkError::LinkNotFound(iface.to_string()));
        }
        let addrs = session.addr_list(iface).await?;
        Ok(addrs.into_iter().map(|net| net.addr()).collect())
    }
}

/// First requested address, with the prefix length of the resource subnet.
fn member_address(subnet: Ipv4Net, addrs: &[Ipv4Addr]) -> Result<Ipv4Net> {
    let Some(&ip) = addrs.first() else {
        return Err(NetworkError::InvalidMember(
            "no address given".to_string(),
        ));
    };
    if !subnet.contains(&ip) {
        return Err(NetworkError::InvalidMember(format!(
            "{ip} is outside subnet {subnet}"
        )));
    }
    if ip == subnet.network() || ip == gateway_address(subnet).addr() {
        return Err(NetworkError::InvalidMember(format!(
            "{ip} is reserved in subnet {subnet}"
        )));
    }
    Ipv4Net::new(ip, subnet.prefix_len())
        .map_err(|e| NetworkError::InvalidMember(format!("{ip}: {e}")))
}
