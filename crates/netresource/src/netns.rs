//! Scoped entry into named network namespaces.
//!
//! `setns(2)` switches the namespace of the calling OS thread only. Tokio
//! worker threads are shared by unrelated tasks, so they never switch: all
//! in-namespace work runs on a dedicated thread owned by a [`NetnsWorker`],
//! which enters once through a [`NetnsGuard`] and executes commands sent to
//! it until dropped.
//!
//! ```text
//!  tokio task                         worker thread (in n-<id>)
//!  ──────────                         ──────────────────────────
//!  NetnsWorker::spawn("n-x") ───────▶ NetnsGuard::enter("n-x")
//!  worker.exec("ip", ..)     ──req──▶ exec("ip", ..)
//!                            ◀─resp── stdout / CommandError
//!  drop(worker)              ──EOF──▶ guard dropped, namespace restored
//! ```

use std::cell::Cell;
use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use nix::sched::{CloneFlags, setns};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

use crate::command::{CommandError, exec, exec_with_stdin};
use crate::error::{NetworkError, Result};

/// Where `ip netns add` bind-mounts named namespaces.
pub const NETNS_RUN_DIR: &str = "/run/netns";

/// Namespace handle of the calling thread.
const CURRENT_THREAD_NETNS: &str = "/proc/thread-self/ns/net";

thread_local! {
    static ENTERED: Cell<bool> = const { Cell::new(false) };
}

/// Path of the bind mount backing a named namespace.
pub fn netns_path(name: &str) -> PathBuf {
    PathBuf::from(NETNS_RUN_DIR).join(name)
}

/// The calling thread is switched into a named namespace for the guard's
/// lifetime.
///
/// Dropping the guard (including during unwinding) switches back to the
/// namespace the thread was in before. Only one guard may be open per
/// thread; the guard is `!Send` so it cannot leave the thread it entered on.
pub struct NetnsGuard {
    name: String,
    original: File,
    _not_send: PhantomData<*const ()>,
}

impl NetnsGuard {
    pub fn enter(name: &str) -> Result<Self> {
        if ENTERED.with(Cell::get) {
            return Err(NetworkError::NamespaceBusy(name.to_string()));
        }

        let target = File::open(netns_path(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NetworkError::NamespaceNotFound(name.to_string())
            } else {
                NetworkError::Namespace(format!("open {name}: {e}"))
            }
        })?;
        let original = File::open(CURRENT_THREAD_NETNS)
            .map_err(|e| NetworkError::Namespace(format!("open current namespace: {e}")))?;

        setns(&target, CloneFlags::CLONE_NEWNET)
            .map_err(|errno| NetworkError::Namespace(format!("setns {name}: {errno}")))?;
        ENTERED.with(|entered| entered.set(true));
        trace!(namespace = %name, "entered network namespace");

        Ok(Self {
            name: name.to_string(),
            original,
            _not_send: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(errno) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            error!(namespace = %self.name, %errno, "failed to restore original network namespace");
        } else {
            trace!(namespace = %self.name, "left network namespace");
        }
        ENTERED.with(|entered| entered.set(false));
    }
}

struct Request {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    reply: oneshot::Sender<std::result::Result<String, CommandError>>,
}

/// A dedicated OS thread parked inside one namespace, running commands on
/// behalf of async callers.
pub struct NetnsWorker {
    name: String,
    tx: mpsc::UnboundedSender<Request>,
}

impl NetnsWorker {
    /// Start a worker thread and enter `name` on it.
    ///
    /// Fails with [`NetworkError::NamespaceNotFound`] when the namespace does
    /// not exist.
    pub async fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Request>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let thread_name = name.to_string();

        std::thread::Builder::new()
            .name(format!("netns-{name}"))
            .spawn(move || worker_main(&thread_name, rx, ready_tx))
            .map_err(|e| NetworkError::Namespace(format!("spawn worker for {name}: {e}")))?;

        ready_rx
            .await
            .map_err(|_| NetworkError::Namespace(format!("worker for {name} exited early")))??;

        Ok(Self {
            name: name.to_string(),
            tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a command inside the worker's namespace.
    pub async fn exec(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> std::result::Result<String, CommandError> {
        let (reply, response) = oneshot::channel();
        let request = Request {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: stdin.map(String::from),
            reply,
        };
        let gone = || CommandError {
            command: format!("{program} {}", args.join(" ")),
            detail: format!("namespace worker for {} is gone", self.name),
        };
        self.tx.send(request).map_err(|_| gone())?;
        response.await.map_err(|_| gone())?
    }
}

fn worker_main(
    name: &str,
    mut rx: mpsc::UnboundedReceiver<Request>,
    ready: oneshot::Sender<Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(NetworkError::Namespace(format!(
                "worker runtime for {name}: {e}"
            ))));
            return;
        }
    };

    let _guard = match NetnsGuard::enter(name) {
        Ok(guard) => guard,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    runtime.block_on(async {
        // Ends when every sender is dropped.
        while let Some(req) = rx.recv().await {
            let args: Vec<&str> = req.args.iter().map(String::as_str).collect();
            let result = match &req.stdin {
                Some(input) => exec_with_stdin(&req.program, &args, input).await,
                None => exec(&req.program, &args).await,
            };
            let _ = req.reply.send(result);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_path_is_under_run_dir() {
        assert_eq!(netns_path("n-net1"), PathBuf::from("/run/netns/n-net1"));
    }

    #[test]
    fn entering_missing_namespace_fails_with_not_found() {
        let err = NetnsGuard::enter("n-does-not-exist-xyz").err().unwrap();
        assert!(matches!(err, NetworkError::NamespaceNotFound(ref n) if n == "n-does-not-exist-xyz"));
        // A failed entry leaves the thread free for another attempt.
        assert!(!ENTERED.with(Cell::get));
    }

    #[test]
    fn nested_entry_on_one_thread_is_rejected() {
        ENTERED.with(|entered| entered.set(true));
        let result = NetnsGuard::enter("n-any");
        ENTERED.with(|entered| entered.set(false));
        assert!(matches!(result, Err(NetworkError::NamespaceBusy(_))));
    }

    #[tokio::test]
    async fn worker_for_missing_namespace_fails() {
        let err = NetnsWorker::spawn("n-missing-xyz").await.err().unwrap();
        assert!(matches!(err, NetworkError::NamespaceNotFound(_)), "{err}");
    }
}
