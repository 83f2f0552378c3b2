use netmodel::{NetId, ValidationError};

use crate::command::CommandError;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("interface name too long: {name} (max {max} characters)")]
    NameTooLong { name: String, max: usize },

    #[error("network namespace {0} does not exist")]
    NamespaceNotFound(String),

    #[error("bridge {0} does not exist")]
    BridgeNotFound(String),

    #[error("link {0} does not exist")]
    LinkNotFound(String),

    #[error("network namespace {0} already entered on this thread")]
    NamespaceBusy(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("kernel call failed: {0}")]
    Kernel(#[from] CommandError),

    #[error("invalid network: {0}")]
    InvalidNetwork(#[from] ValidationError),

    #[error("invalid member: {0}")]
    InvalidMember(String),

    #[error("prerequisites not met: {0}")]
    Prerequisites(String),

    #[error("no network resource for node {node_id} in network {net_id}")]
    NoLocalResource { net_id: NetId, node_id: String },
}
