//! Everything the node agent consumes from the central directory: an HTTP
//! [`Directory`](netmodel::Directory) implementation and the [`Watcher`]
//! that turns version counters into change notifications.

mod client;
mod watcher;

pub use client::{DEFAULT_TIMEOUT, HttpDirectory};
pub use watcher::{DEFAULT_POLL_INTERVAL, VersionCursor, Watcher};
