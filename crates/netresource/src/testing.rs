//! In-memory [`Kernel`] used by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipnet::IpNet;

use crate::command::CommandError;
use crate::error::{NetworkError, Result};
use crate::kernel::{Change, Kernel, NamespaceSession, NetnsTarget};
use crate::plan::Route;
use crate::wireguard::WgConfig;

/// Key of the agent's own namespace.
pub(crate) const HOST: &str = "<host>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Loopback,
    Bridge,
    Veth,
    Wireguard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakeLink {
    pub kind: LinkKind,
    pub up: bool,
    pub master: Option<String>,
    pub addrs: BTreeSet<IpNet>,
    pub wg: Option<WgConfig>,
    /// `(namespace, name)` of the other veth end.
    pub peer: Option<(String, String)>,
}

impl FakeLink {
    fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            up: false,
            master: None,
            addrs: BTreeSet::new(),
            wg: None,
            peer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FakeNetns {
    pub links: BTreeMap<String, FakeLink>,
    /// Route display string -> device.
    pub routes: BTreeMap<String, String>,
    pub sysctls: BTreeMap<String, String>,
    pub ruleset: Option<String>,
}

impl FakeNetns {
    fn fresh() -> Self {
        let mut ns = Self::default();
        ns.links
            .insert("lo".to_string(), FakeLink::new(LinkKind::Loopback));
        ns
    }
}

#[derive(Debug)]
struct FakeState {
    namespaces: BTreeMap<String, FakeNetns>,
    /// Every object creation, in order.
    created: Vec<String>,
    failing_routes: BTreeSet<String>,
    fail_namespace_delete: bool,
}

fn kernel_err(command: &str, detail: &str) -> NetworkError {
    NetworkError::Kernel(CommandError {
        command: command.to_string(),
        detail: detail.to_string(),
    })
}

fn exists_err(command: &str) -> NetworkError {
    kernel_err(command, "RTNETLINK answers: File exists")
}

fn missing_err(command: &str, name: &str) -> NetworkError {
    kernel_err(command, &format!("Device \"{name}\" does not exist."))
}

#[derive(Clone)]
pub(crate) struct FakeKernel {
    state: Arc<Mutex<FakeState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(HOST.to_string(), FakeNetns::fresh());
        Self {
            state: Arc::new(Mutex::new(FakeState {
                namespaces,
                created: Vec::new(),
                failing_routes: BTreeSet::new(),
                fail_namespace_delete: false,
            })),
        }
    }

    /// Pre-create a named namespace, e.g. a public one.
    pub fn add_namespace(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .namespaces
            .insert(name.to_string(), FakeNetns::fresh());
    }

    pub fn snapshot(&self) -> BTreeMap<String, FakeNetns> {
        self.state.lock().unwrap().namespaces.clone()
    }

    pub fn namespace(&self, name: &str) -> Option<FakeNetns> {
        self.state.lock().unwrap().namespaces.get(name).cloned()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// Make `ip route add <destination> ...` fail with a non-EEXIST error.
    pub fn fail_route(&self, destination: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_routes
            .insert(destination.to_string());
    }

    pub fn fail_namespace_delete(&self) {
        self.state.lock().unwrap().fail_namespace_delete = true;
    }

    /// Insert a link directly, bypassing the session API.
    pub fn put_link(&self, ns: &str, name: &str, kind: LinkKind) {
        let mut state = self.state.lock().unwrap();
        if let Some(netns) = state.namespaces.get_mut(ns) {
            netns.links.insert(name.to_string(), FakeLink::new(kind));
        }
    }

    pub fn put_addr(&self, ns: &str, link: &str, addr: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(l) = state
            .namespaces
            .get_mut(ns)
            .and_then(|n| n.links.get_mut(link))
        {
            l.addrs.insert(addr.parse().unwrap());
        }
    }
}

#[async_trait]
impl Kernel for FakeKernel {
    type Session = FakeSession;

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.contains_key(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.namespaces.contains_key(name) {
            return Err(kernel_err("ip netns add", "Cannot create namespace: File exists"));
        }
        state
            .namespaces
            .insert(name.to_string(), FakeNetns::fresh());
        state.created.push(format!("netns:{name}"));
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_namespace_delete {
            return Err(kernel_err("ip netns del", "Device or resource busy"));
        }
        let Some(removed) = state.namespaces.remove(name) else {
            return Err(kernel_err("ip netns del", "No such file or directory"));
        };
        // Veth ends living elsewhere vanish with their partner.
        for link in removed.links.values() {
            if let Some((peer_ns, peer_name)) = &link.peer
                && let Some(netns) = state.namespaces.get_mut(peer_ns)
            {
                netns.links.remove(peer_name);
            }
        }
        Ok(())
    }

    async fn host(&self) -> Result<FakeSession> {
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            ns: HOST.to_string(),
        })
    }

    async fn enter(&self, name: &str) -> Result<FakeSession> {
        if !self.state.lock().unwrap().namespaces.contains_key(name) {
            return Err(NetworkError::NamespaceNotFound(name.to_string()));
        }
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            ns: name.to_string(),
        })
    }
}

pub(crate) struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    ns: String,
}

impl FakeSession {
    fn with<T>(&self, f: impl FnOnce(&mut FakeState, &str) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.contains_key(&self.ns) {
            return Err(NetworkError::NamespaceNotFound(self.ns.clone()));
        }
        f(&mut *state, &self.ns)
    }

    fn target_key(target: NetnsTarget<'_>) -> String {
        match target {
            NetnsTarget::Host => HOST.to_string(),
            NetnsTarget::Named(n) => n.to_string(),
        }
    }

    fn create_link(&self, name: &str, kind: LinkKind, label: &str) -> Result<()> {
        self.with(|state, ns| {
            let netns = state.namespaces.get_mut(ns).unwrap();
            if netns.links.contains_key(name) {
                return Err(exists_err("ip link add"));
            }
            netns.links.insert(name.to_string(), FakeLink::new(kind));
            state.created.push(format!("{label}:{name}"));
            Ok(())
        })
    }

    fn with_link<T>(
        &self,
        command: &str,
        name: &str,
        f: impl FnOnce(&mut FakeLink) -> Result<T>,
    ) -> Result<T> {
        self.with(|state, ns| {
            let link = state
                .namespaces
                .get_mut(ns)
                .unwrap()
                .links
                .get_mut(name)
                .ok_or_else(|| missing_err(command, name))?;
            f(link)
        })
    }
}

#[async_trait]
impl NamespaceSession for FakeSession {
    async fn link_exists(&self, name: &str) -> Result<bool> {
        self.with(|state, ns| Ok(state.namespaces[ns].links.contains_key(name)))
    }

    async fn create_bridge(&self, name: &str) -> Result<()> {
        self.create_link(name, LinkKind::Bridge, "bridge")?;
        self.set_link_up(name).await
    }

    async fn create_wireguard(&self, name: &str) -> Result<()> {
        self.create_link(name, LinkKind::Wireguard, "wireguard")
    }

    async fn create_veth(&self, name: &str, peer: &str, peer_ns: NetnsTarget<'_>) -> Result<()> {
        let target = Self::target_key(peer_ns);
        self.with(|state, ns| {
            if !state.namespaces.contains_key(&target) {
                return Err(kernel_err("ip link add", "Invalid \"netns\" value"));
            }
            if state.namespaces[ns].links.contains_key(name)
                || state.namespaces[&target].links.contains_key(peer)
            {
                return Err(exists_err("ip link add"));
            }
            let mut here = FakeLink::new(LinkKind::Veth);
            here.peer = Some((target.clone(), peer.to_string()));
            let mut there = FakeLink::new(LinkKind::Veth);
            there.peer = Some((ns.to_string(), name.to_string()));
            state
                .namespaces
                .get_mut(ns)
                .unwrap()
                .links
                .insert(name.to_string(), here);
            state
                .namespaces
                .get_mut(&target)
                .unwrap()
                .links
                .insert(peer.to_string(), there);
            state.created.push(format!("veth:{name}"));
            Ok(())
        })
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.with(|state, ns| {
            let removed = state
                .namespaces
                .get_mut(ns)
                .unwrap()
                .links
                .remove(name)
                .ok_or_else(|| missing_err("ip link del", name))?;
            if let Some((peer_ns, peer_name)) = removed.peer
                && let Some(netns) = state.namespaces.get_mut(&peer_ns)
            {
                netns.links.remove(&peer_name);
            }
            Ok(())
        })
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.with_link("ip link set up", name, |link| {
            link.up = true;
            Ok(())
        })
    }

    async fn set_master(&self, link: &str, bridge: &str) -> Result<()> {
        let bridge_exists = self.link_exists(bridge).await?;
        if !bridge_exists {
            return Err(missing_err("ip link set master", bridge));
        }
        self.with_link("ip link set master", link, |l| {
            l.master = Some(bridge.to_string());
            Ok(())
        })
    }

    async fn move_link(&self, name: &str, target: NetnsTarget<'_>) -> Result<()> {
        let target = Self::target_key(target);
        self.with(|state, ns| {
            if !state.namespaces.contains_key(&target) {
                return Err(kernel_err("ip link set netns", "Invalid \"netns\" value"));
            }
            let link = state
                .namespaces
                .get_mut(ns)
                .unwrap()
                .links
                .remove(name)
                .ok_or_else(|| missing_err("ip link set netns", name))?;
            state
                .namespaces
                .get_mut(&target)
                .unwrap()
                .links
                .insert(name.to_string(), link);
            Ok(())
        })
    }

    async fn addr_list(&self, link: &str) -> Result<BTreeSet<IpNet>> {
        self.with_link("ip addr show", link, |l| Ok(l.addrs.clone()))
    }

    async fn addr_add(&self, link: &str, addr: IpNet) -> Result<Change> {
        self.with_link("ip addr add", link, |l| {
            if l.addrs.insert(addr) {
                Ok(Change::Applied)
            } else {
                Ok(Change::AlreadyPresent)
            }
        })
    }

    async fn addr_del(&self, link: &str, addr: IpNet) -> Result<()> {
        self.with_link("ip addr del", link, |l| {
            l.addrs.remove(&addr);
            Ok(())
        })
    }

    async fn route_add(&self, link: &str, route: &Route) -> Result<Change> {
        self.with(|state, ns| {
            if state
                .failing_routes
                .contains(&route.destination.to_string())
            {
                return Err(kernel_err(
                    "ip route add",
                    "RTNETLINK answers: Network is unreachable",
                ));
            }
            let netns = state.namespaces.get_mut(ns).unwrap();
            if !netns.links.contains_key(link) {
                return Err(missing_err("ip route add", link));
            }
            let key = route.to_string();
            if netns.routes.contains_key(&key) {
                return Ok(Change::AlreadyPresent);
            }
            netns.routes.insert(key, link.to_string());
            Ok(Change::Applied)
        })
    }

    async fn wg_configure(&self, link: &str, config: &WgConfig) -> Result<()> {
        self.with_link("wg setconf", link, |l| {
            l.wg = Some(config.clone());
            Ok(())
        })
    }

    async fn sysctl(&self, key: &str, value: &str) -> Result<()> {
        self.with(|state, ns| {
            state
                .namespaces
                .get_mut(ns)
                .unwrap()
                .sysctls
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn apply_ruleset(&self, ruleset: &str) -> Result<()> {
        self.with(|state, ns| {
            state.namespaces.get_mut(ns).unwrap().ruleset = Some(ruleset.to_string());
            Ok(())
        })
    }
}
