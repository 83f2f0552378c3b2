use crate::types::NetId;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("network {0} not found")]
    NotFound(NetId),

    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("invalid directory response: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("network {net_id} ip range {range} is not a /16")]
    RangeNotSlash16 { net_id: NetId, range: String },

    #[error("subnet {subnet} of node {node_id} is outside network range {range}")]
    SubnetOutsideRange {
        node_id: String,
        subnet: String,
        range: String,
    },
}
