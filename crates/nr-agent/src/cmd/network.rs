use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Args;
use netmodel::{Directory, NetId, Network};
use netresource::{Networker, NetworkerConfig, SystemKernel, check_prerequisites};
use tracing::info;

use super::{ConfigArgs, build_directory, build_networker};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::lock;

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Network id to act on
    #[arg(long)]
    net_id: String,
}

#[derive(Args)]
pub struct JoinArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Network id to join
    #[arg(long)]
    net_id: String,
    /// Member name, also the name of its namespace
    #[arg(long)]
    member: String,
    /// Address to give the member (the first one is used)
    #[arg(long = "addr", required = true)]
    addrs: Vec<Ipv4Addr>,
}

#[derive(Args)]
pub struct LeaveArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Network id the member joined
    #[arg(long)]
    net_id: String,
    /// Member name given to join
    #[arg(long)]
    member: String,
}

#[derive(Args)]
pub struct AddrsArgs {
    /// Interface to inspect
    iface: String,
    /// Namespace the interface lives in
    #[arg(long)]
    netns: Option<String>,
}

/// Load config, check the host and fetch the network from the directory.
async fn prepare(
    args: ConfigArgs,
    net_id: &str,
) -> AgentResult<(AgentConfig, Networker<SystemKernel>, Network)> {
    let config = args.load().await?;
    check_prerequisites()?;
    let directory = build_directory(&config)?;
    let network = directory.get_network(&NetId::from(net_id)).await?;
    let networker = build_networker(&config);
    Ok((config, networker, network))
}

fn print_line(line: &str) -> AgentResult<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    Ok(())
}

/// Create and configure the local resource of one network.
pub async fn run_apply(args: ApplyArgs) -> AgentResult<()> {
    let (config, networker, network) = prepare(args.config, &args.net_id).await?;
    let _lock = lock::acquire(config.lock_path()).await?;
    let namespace = networker.apply(&network).await?;
    info!(net_id = %network.net_id, namespace = %namespace, "applied");
    print_line(&namespace)
}

/// Tear down the local resource of one network. Works from the id alone,
/// so networks already gone from the directory can be removed.
pub async fn run_delete(args: ApplyArgs) -> AgentResult<()> {
    let config = args.config.load().await?;
    check_prerequisites()?;
    let _lock = lock::acquire(config.lock_path()).await?;
    let net_id = NetId::from(args.net_id.as_str());
    if build_networker(&config).delete_by_id(&net_id).await? {
        info!(net_id = %net_id, "deleted");
    } else {
        info!(net_id = %net_id, "nothing to delete");
    }
    Ok(())
}

/// Print how far the local resource of one network got.
pub async fn run_status(args: ApplyArgs) -> AgentResult<()> {
    let (_config, networker, network) = prepare(args.config, &args.net_id).await?;
    let state = networker.state(&network).await?;
    print_line(&state.to_string())
}

/// Attach a member namespace to a network and print it as JSON.
pub async fn run_join(args: JoinArgs) -> AgentResult<()> {
    let (_config, networker, network) = prepare(args.config, &args.net_id).await?;
    let member = networker.join(&network, &args.member, &args.addrs).await?;
    let json = serde_json::to_string_pretty(&member)
        .map_err(|e| AgentError::Internal(format!("encode member: {e}")))?;
    print_line(&json)
}

/// Remove a member namespace.
pub async fn run_leave(args: LeaveArgs) -> AgentResult<()> {
    let config = args.config.load().await?;
    check_prerequisites()?;
    let networker = build_networker(&config);
    networker
        .leave(&NetId::from(args.net_id.as_str()), &args.member)
        .await?;
    Ok(())
}

/// Print the addresses of an interface, one per line.
pub async fn run_addrs(args: AddrsArgs) -> AgentResult<()> {
    // Address lookups do not depend on the node identity.
    let networker = Networker::new(
        Arc::new(SystemKernel::new()),
        NetworkerConfig {
            node_id: String::new(),
            public_namespace: None,
        },
    );
    for addr in networker.addrs(&args.iface, args.netns.as_deref()).await? {
        print_line(&addr.to_string())?;
    }
    Ok(())
}
