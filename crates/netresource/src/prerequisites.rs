use std::path::Path;

use nix::unistd::geteuid;

use crate::error::{NetworkError, Result};

/// Tools the system kernel driver shells out to.
pub const REQUIRED_COMMANDS: [&str; 4] = ["ip", "wg", "nft", "sysctl"];

/// Verify that the host can run network resources before touching anything.
///
/// Collects all failures and returns them in a single `Prerequisites` error.
pub fn check_prerequisites() -> Result<()> {
    let mut errors = Vec::new();

    check_root(&mut errors);
    check_netns_support(&mut errors);
    check_required_commands(&REQUIRED_COMMANDS, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(NetworkError::Prerequisites(errors.join("; ")))
    }
}

fn check_root(errors: &mut Vec<String>) {
    if !geteuid().is_root() {
        errors.push("root privileges required to manage network namespaces".to_string());
    }
}

fn check_netns_support(errors: &mut Vec<String>) {
    let handle = Path::new("/proc/self/ns/net");
    if !handle.exists() {
        errors.push(format!(
            "{} not found (network namespaces not supported)",
            handle.display()
        ));
    }
}

fn check_required_commands(commands: &[&str], errors: &mut Vec<String>) {
    for cmd in commands {
        if which::which(cmd).is_err() {
            errors.push(format!("required command not found: {cmd}"));
        }
    }
}
