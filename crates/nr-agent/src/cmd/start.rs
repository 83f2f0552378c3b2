use std::sync::Arc;

use clap::Args;
use directory::Watcher;
use netmodel::{Directory, NetId};
use netresource::check_prerequisites;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{ConfigArgs, build_directory, build_networker};
use crate::error::AgentResult;
use crate::lock;
use crate::reconcile::{Applier, Outcome, Reconciler};

#[derive(Args)]
pub struct StartArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

/// Watch the directory and reconcile every changed network until SIGTERM
/// or SIGINT. Network resources are left in place on exit.
pub async fn run_start(args: StartArgs) -> AgentResult<()> {
    let config = args.config.load().await?;
    check_prerequisites()?;
    let _lock = lock::acquire(config.lock_path()).await?;

    let directory: Arc<dyn Directory> = Arc::new(build_directory(&config)?);
    let mut reconciler = Reconciler::new(
        config.node_id.clone(),
        Arc::clone(&directory),
        build_networker(&config),
    );

    // -----------------------------------------------------------------------
    // Signal handling
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, stopping");
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, stopping");
            }
        }
        signal_shutdown.cancel();
    });

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    let mut changes = Watcher::new(config.node_id.clone(), directory)
        .with_interval(config.poll_interval())
        .watch(shutdown.clone());

    let mut retry = tokio::time::interval(config.poll_interval());
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    retry.tick().await;

    info!(node_id = %config.node_id, "agent started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            change = changes.recv() => {
                let Some(id) = change else { break };
                handle_change(&mut reconciler, &id).await;
            }
            _ = retry.tick() => {
                if !reconciler.failed().is_empty() {
                    reconciler.retry_failed().await;
                }
                reconciler.sweep().await;
            }
        }
    }

    info!("agent stopped, network resources left in place");
    Ok(())
}

async fn handle_change<A: Applier>(reconciler: &mut Reconciler<A>, id: &NetId) {
    match reconciler.reconcile(id).await {
        Ok(Outcome::Applied(namespace)) => {
            info!(net_id = %id, namespace = %namespace, "network reconciled");
        }
        Ok(Outcome::Removed) => info!(net_id = %id, "network removed from node"),
        Ok(Outcome::Unchanged) => debug!(net_id = %id, "nothing to reconcile"),
        Err(e) => error!(net_id = %id, error = %e, "reconciliation failed (will retry)"),
    }
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
