//! Tenant overlay network description shared by the node agent.
//!
//! A [`Network`] is owned and versioned by the directory service. The agent
//! only reads it: each node picks its own [`NetResource`] and materializes it
//! as kernel objects.

mod directory;
mod error;
mod types;

pub use directory::Directory;
pub use error::{DirectoryError, ValidationError};
pub use types::{AccessPoint, Member, NetId, NetResource, Network, Peer};
