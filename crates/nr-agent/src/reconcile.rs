//! Drives the local node towards the networks the directory describes.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use netmodel::{Directory, DirectoryError, NetId, Network};
use netresource::{Kernel, NetworkError, Networker};
use tracing::{debug, error, info, warn};

use crate::error::AgentResult;

/// What the reconciler needs from the network layer.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, network: &Network) -> Result<String, NetworkError>;
    /// Tear down the resource of `id`; reports whether anything was present.
    async fn delete(&self, id: &NetId) -> Result<bool, NetworkError>;
}

#[async_trait]
impl<K: Kernel + 'static> Applier for Networker<K> {
    async fn apply(&self, network: &Network) -> Result<String, NetworkError> {
        Networker::apply(self, network).await
    }

    async fn delete(&self, id: &NetId) -> Result<bool, NetworkError> {
        Networker::delete_by_id(self, id).await
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The network resource is in place, in this namespace.
    Applied(String),
    /// The network no longer involves this node and was torn down.
    Removed,
    /// Nothing to do.
    Unchanged,
}

pub struct Reconciler<A: Applier> {
    node_id: String,
    directory: Arc<dyn Directory>,
    applier: A,
    /// Ids applied by this process.
    applied: BTreeSet<NetId>,
    /// Ids whose last reconciliation failed.
    failed: BTreeSet<NetId>,
}

impl<A: Applier> Reconciler<A> {
    pub fn new(node_id: impl Into<String>, directory: Arc<dyn Directory>, applier: A) -> Self {
        Self {
            node_id: node_id.into(),
            directory,
            applier,
            applied: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn failed(&self) -> &BTreeSet<NetId> {
        &self.failed
    }

    /// Bring one network to its directory state. A failed id is remembered
    /// and picked up again by [`retry_failed`](Self::retry_failed).
    pub async fn reconcile(&mut self, id: &NetId) -> AgentResult<Outcome> {
        let result = self.reconcile_once(id).await;
        match &result {
            Ok(_) => {
                self.failed.remove(id);
            }
            Err(_) => {
                self.failed.insert(id.clone());
            }
        }
        result
    }

    async fn reconcile_once(&mut self, id: &NetId) -> AgentResult<Outcome> {
        let network = match self.directory.get_network(id).await {
            Ok(network) => network,
            Err(DirectoryError::NotFound(_)) => {
                info!(net_id = %id, "network no longer in directory");
                return self.teardown(id).await;
            }
            Err(e) => return Err(e.into()),
        };

        if network.resource_for(&self.node_id).is_none() {
            info!(net_id = %id, node_id = %self.node_id, "network no longer uses this node");
            return self.teardown(id).await;
        }

        let namespace = self.applier.apply(&network).await?;
        self.applied.insert(id.clone());
        Ok(Outcome::Applied(namespace))
    }

    /// Teardown works from the id alone, so resources left by an earlier
    /// agent process are removed too.
    async fn teardown(&mut self, id: &NetId) -> AgentResult<Outcome> {
        let removed = self.applier.delete(id).await?;
        self.applied.remove(id);
        if removed {
            Ok(Outcome::Removed)
        } else {
            debug!(net_id = %id, "nothing present locally");
            Ok(Outcome::Unchanged)
        }
    }

    /// Reconcile applied ids that vanished from this node's version map.
    /// The watcher only reports ids present in the map, so these would
    /// otherwise never be torn down.
    pub async fn sweep(&mut self) {
        if self.applied.is_empty() {
            return;
        }
        let versions = match self.directory.networks_version(&self.node_id).await {
            Ok(versions) => versions,
            Err(e) => {
                warn!(error = %e, "could not list networks for sweep");
                return;
            }
        };
        let gone: Vec<NetId> = self
            .applied
            .iter()
            .filter(|id| !versions.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            info!(net_id = %id, "network left the version map");
            if let Err(e) = self.reconcile(&id).await {
                error!(net_id = %id, error = %e, "reconciliation failed");
            }
        }
    }

    /// Reconcile every id whose last attempt failed.
    pub async fn retry_failed(&mut self) {
        let pending = std::mem::take(&mut self.failed);
        for id in pending {
            warn!(net_id = %id, "retrying failed reconciliation");
            if let Err(e) = self.reconcile(&id).await {
                error!(net_id = %id, error = %e, "reconciliation failed");
            }
        }
    }
}
