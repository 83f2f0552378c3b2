use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::types::{NetId, Network};

/// Read side of the central directory the agent reconciles against.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch the full description of a network.
    ///
    /// Fails with [`DirectoryError::NotFound`] when the id is unknown.
    async fn get_network(&self, id: &NetId) -> Result<Network, DirectoryError>;

    /// Current version of every network the node takes part in.
    async fn networks_version(&self, node_id: &str)
    -> Result<HashMap<NetId, u32>, DirectoryError>;
}
