use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{AgentError, AgentResult};

/// Take the single-instance lock of the agent, failing right away when
/// another agent holds it. Parent directories are created as needed.
///
/// The returned guard holds the lock until dropped.
pub async fn acquire(path: PathBuf) -> AgentResult<Flock<std::fs::File>> {
    tokio::task::spawn_blocking(move || {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                AgentError::Internal(format!("create lock dir {}: {e}", dir.display()))
            })?;
        }
        let file = std::fs::File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| AgentError::Internal(format!("open lock {}: {e}", path.display())))?;
        Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_file, e)| {
            if e == Errno::EWOULDBLOCK {
                AgentError::Internal(format!(
                    "another agent is running (lock {} is held)",
                    path.display()
                ))
            } else {
                AgentError::Internal(format!("flock {}: {e}", path.display()))
            }
        })
    })
    .await
    .map_err(|e| AgentError::Internal(format!("lock task: {e}")))?
}
