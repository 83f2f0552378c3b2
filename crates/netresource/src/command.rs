use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Error from a failed command.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

impl CommandError {
    /// The kernel refused because the object is already there (`EEXIST`).
    pub fn is_already_exists(&self) -> bool {
        self.detail.contains("File exists")
    }

    /// The named device or object is missing.
    pub fn is_not_found(&self) -> bool {
        self.detail.contains("does not exist")
            || self.detail.contains("Cannot find device")
            || self.detail.contains("No such device")
    }
}

/// Format a human-readable display string for a direct command invocation.
fn format_command_display(program: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend_from_slice(args);
    parts.join(" ")
}

/// Execute a command.
///
/// Invokes the program binary directly with the given arguments in the
/// network namespace of the calling thread. Returns trimmed stdout on success.
pub async fn exec(program: &str, args: &[&str]) -> Result<String, CommandError> {
    run(program, args, None).await
}

/// Execute a command, feeding `input` on stdin.
///
/// Used for tools reading their configuration from stdin (`wg setconf`,
/// `nft -f -`) so secrets never touch the filesystem.
pub async fn exec_with_stdin(
    program: &str,
    args: &[&str],
    input: &str,
) -> Result<String, CommandError> {
    run(program, args, Some(input)).await
}

async fn run(program: &str, args: &[&str], input: Option<&str>) -> Result<String, CommandError> {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec");

    let spawn_error = |e: std::io::Error| CommandError {
        command: cmd_display.clone(),
        detail: e.to_string(),
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    if let Some(input) = input
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(spawn_error)?;
        // Close stdin so the program sees EOF.
        drop(stdin);
    }

    let output = child.wait_with_output().await.map_err(spawn_error)?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(CommandError {
            command: cmd_display,
            detail: stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_command_display_joins_args() {
        let display = format_command_display("ip", &["link", "show", "dev", "b-net1"]);
        assert_eq!(display, "ip link show dev b-net1");
    }

    #[test]
    fn already_exists_is_recognized() {
        let err = CommandError {
            command: "ip route add 10.0.5.0/24 via 100.64.5.0 dev w-net1".into(),
            detail: "RTNETLINK answers: File exists".into(),
        };
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_recognized() {
        let err = CommandError {
            command: "ip link show dev b-net1".into(),
            detail: "Device \"b-net1\" does not exist.".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[tokio::test]
    async fn exec_returns_trimmed_stdout() {
        let output = exec("echo", &["hello"]).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn exec_returns_error_on_failure() {
        let err = exec("false", &[]).await.unwrap_err();
        assert!(
            err.command.contains("false"),
            "command was: {}",
            err.command
        );
    }

    #[tokio::test]
    async fn exec_error_contains_stderr() {
        let err = exec("bash", &["-c", "echo oops >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(err.detail.contains("oops"), "detail was: {}", err.detail);
    }

    #[tokio::test]
    async fn exec_with_stdin_feeds_input() {
        let output = exec_with_stdin("cat", &[], "private-key\n").await.unwrap();
        assert_eq!(output, "private-key");
    }

    #[tokio::test]
    async fn exec_reports_missing_binary() {
        let err = exec("definitely-not-a-real-binary", &[])
            .await
            .unwrap_err();
        assert!(err.command.contains("definitely-not-a-real-binary"));
    }
}
