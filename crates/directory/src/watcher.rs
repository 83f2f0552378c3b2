//! Turns per-network version counters into change notifications.
//!
//! The last seen version of every network lives in memory only. A restarted
//! watcher therefore reports every current network once, and consumers must
//! treat a notification as "reconcile now", never as "this changed".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use netmodel::{Directory, NetId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between two polls of the directory.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

const CHANNEL_CAPACITY: usize = 16;

/// Last seen version per network.
#[derive(Debug, Default)]
pub struct VersionCursor {
    seen: HashMap<NetId, u32>,
}

impl VersionCursor {
    /// Record `current` and return the networks that are new or whose
    /// version went up, sorted by id.
    ///
    /// The stored version is always replaced, so a network whose version
    /// went down is reported again once it climbs past the lower value.
    pub fn advance(&mut self, current: HashMap<NetId, u32>) -> Vec<NetId> {
        let mut changed = Vec::new();
        for (id, version) in current {
            if self.seen.get(&id).is_none_or(|&seen| version > seen) {
                changed.push(id.clone());
            }
            self.seen.insert(id, version);
        }
        changed.sort();
        changed
    }

    pub fn version(&self, id: &NetId) -> Option<u32> {
        self.seen.get(id).copied()
    }
}

/// Polls the directory for the networks of one node.
pub struct Watcher {
    node_id: String,
    directory: Arc<dyn Directory>,
    interval: Duration,
}

impl Watcher {
    pub fn new(node_id: impl Into<String>, directory: Arc<dyn Directory>) -> Self {
        Self {
            node_id: node_id.into(),
            directory,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start polling in a background task.
    ///
    /// The receiver yields the id of every network that appeared or got a
    /// newer version. It closes once `cancel` fires.
    pub fn watch(self, cancel: CancellationToken) -> mpsc::Receiver<NetId> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.run(cancel, tx));
        rx
    }

    async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<NetId>) {
        info!(
            node_id = %self.node_id,
            interval_secs = self.interval.as_secs(),
            "watching networks"
        );
        let mut cursor = VersionCursor::default();

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.directory.networks_version(&self.node_id) => res,
            };

            match fetched {
                Ok(versions) => {
                    for id in cursor.advance(versions) {
                        debug!(net_id = %id, version = ?cursor.version(&id), "network changed");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            sent = tx.send(id) => {
                                if sent.is_err() {
                                    debug!("network change receiver dropped");
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(node_id = %self.node_id, error = %e, "failed to get networks version (will retry)");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(node_id = %self.node_id, "watcher stopped");
    }
}
