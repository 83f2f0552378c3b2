//! [`Kernel`] backed by iproute2, wireguard-tools, nftables and sysctl.

use std::collections::BTreeSet;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{CommandError, exec, exec_with_stdin};
use crate::error::{NetworkError, Result};
use crate::kernel::{Change, Kernel, NamespaceSession, NetnsTarget};
use crate::netns::{NetnsWorker, netns_path};
use crate::plan::Route;
use crate::wireguard::WgConfig;

/// Talks to the running kernel. Requires `CAP_NET_ADMIN` and `CAP_SYS_ADMIN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKernel;

impl SystemKernel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Kernel for SystemKernel {
    type Session = SystemSession;

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let path = netns_path(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| NetworkError::Namespace(format!("stat {}: {e}", path.display())))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        exec("ip", &["netns", "add", name]).await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        exec("ip", &["netns", "del", name]).await?;
        Ok(())
    }

    async fn host(&self) -> Result<SystemSession> {
        Ok(SystemSession {
            worker: None,
        })
    }

    async fn enter(&self, name: &str) -> Result<SystemSession> {
        let worker = NetnsWorker::spawn(name).await?;
        debug!(namespace = %name, "namespace session opened");
        Ok(SystemSession {
            worker: Some(worker),
        })
    }
}

/// Commands run either in the agent's namespace or on a namespace worker.
pub struct SystemSession {
    worker: Option<NetnsWorker>,
}

impl SystemSession {
    async fn run(&self, program: &str, args: &[&str]) -> std::result::Result<String, CommandError> {
        match &self.worker {
            Some(worker) => worker.exec(program, args, None).await,
            None => exec(program, args).await,
        }
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> std::result::Result<String, CommandError> {
        match &self.worker {
            Some(worker) => worker.exec(program, args, Some(input)).await,
            None => exec_with_stdin(program, args, input).await,
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<()> {
        self.run("ip", args).await?;
        Ok(())
    }

    /// Additive call that reports `EEXIST` as [`Change::AlreadyPresent`].
    async fn ip_additive(&self, args: &[&str]) -> Result<Change> {
        match self.run("ip", args).await {
            Ok(_) => Ok(Change::Applied),
            Err(e) if e.is_already_exists() => Ok(Change::AlreadyPresent),
            Err(e) => Err(e.into()),
        }
    }
}

/// `netns` argument of `ip link` for a target namespace.
fn netns_arg(target: NetnsTarget<'_>) -> String {
    match target {
        // The agent's main thread never switches namespace, so its pid
        // designates the host namespace even when called from a worker.
        NetnsTarget::Host => std::process::id().to_string(),
        NetnsTarget::Named(name) => name.to_string(),
    }
}

#[derive(Deserialize)]
struct IpAddrShow {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    local: IpAddr,
    prefixlen: u8,
}

/// Parse `ip -json addr show dev <link>`.
fn parse_addr_show(json: &str) -> Result<BTreeSet<IpNet>> {
    let links: Vec<IpAddrShow> = serde_json::from_str(json).map_err(|e| {
        NetworkError::Kernel(CommandError {
            command: "ip -json addr show".into(),
            detail: format!("unexpected output: {e}"),
        })
    })?;
    let mut addrs = BTreeSet::new();
    for info in links.into_iter().flat_map(|l| l.addr_info) {
        let net = IpNet::new(info.local, info.prefixlen).map_err(|e| {
            NetworkError::Kernel(CommandError {
                command: "ip -json addr show".into(),
                detail: format!("bad prefix {}/{}: {e}", info.local, info.prefixlen),
            })
        })?;
        addrs.insert(net);
    }
    Ok(addrs)
}

fn route_args<'a>(route: &'a str, gateway: Option<&'a str>, link: &'a str) -> Vec<&'a str> {
    let mut args = vec!["route", "add", route];
    if let Some(gw) = gateway {
        args.extend(["via", gw]);
    }
    args.extend(["dev", link]);
    args
}

#[async_trait]
impl NamespaceSession for SystemSession {
    async fn link_exists(&self, name: &str) -> Result<bool> {
        match self.run("ip", &["link", "show", "dev", name]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bridge(&self, name: &str) -> Result<()> {
        info!(bridge = %name, "creating bridge");
        self.ip(&["link", "add", "name", name, "type", "bridge"]).await?;
        self.set_link_up(name).await
    }

    async fn create_wireguard(&self, name: &str) -> Result<()> {
        self.ip(&["link", "add", "dev", name, "type", "wireguard"]).await
    }

    async fn create_veth(&self, name: &str, peer: &str, peer_ns: NetnsTarget<'_>) -> Result<()> {
        let netns = netns_arg(peer_ns);
        self.ip(&[
            "link", "add", name, "type", "veth", "peer", "name", peer, "netns", &netns,
        ])
        .await
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.ip(&["link", "del", "dev", name]).await
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", name, "up"]).await
    }

    async fn set_master(&self, link: &str, bridge: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", link, "master", bridge]).await
    }

    async fn move_link(&self, name: &str, target: NetnsTarget<'_>) -> Result<()> {
        let netns = netns_arg(target);
        self.ip(&["link", "set", "dev", name, "netns", &netns]).await
    }

    async fn addr_list(&self, link: &str) -> Result<BTreeSet<IpNet>> {
        let out = self
            .run("ip", &["-json", "addr", "show", "dev", link])
            .await?;
        parse_addr_show(&out)
    }

    async fn addr_add(&self, link: &str, addr: IpNet) -> Result<Change> {
        let addr = addr.to_string();
        self.ip_additive(&["addr", "add", &addr, "dev", link]).await
    }

    async fn addr_del(&self, link: &str, addr: IpNet) -> Result<()> {
        let addr = addr.to_string();
        self.ip(&["addr", "del", &addr, "dev", link]).await
    }

    async fn route_add(&self, link: &str, route: &Route) -> Result<Change> {
        let destination = route.destination.to_string();
        let gateway = route.gateway.map(|gw| gw.to_string());
        let args = route_args(&destination, gateway.as_deref(), link);
        self.ip_additive(&args).await
    }

    async fn wg_configure(&self, link: &str, config: &WgConfig) -> Result<()> {
        self.run_with_stdin("wg", &["setconf", link, "/dev/stdin"], &config.render())
            .await?;
        Ok(())
    }

    async fn sysctl(&self, key: &str, value: &str) -> Result<()> {
        let assignment = format!("{key}={value}");
        self.run("sysctl", &["-q", "-w", &assignment]).await?;
        Ok(())
    }

    async fn apply_ruleset(&self, ruleset: &str) -> Result<()> {
        self.run_with_stdin("nft", &["-f", "-"], ruleset).await?;
        Ok(())
    }
}
