mod cmd;
mod config;
mod error;
mod lock;
mod reconcile;

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "nr-agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the directory and keep every network of this node converged
    Start(cmd::StartArgs),
    /// Create and configure the local resource of one network
    Apply(cmd::ApplyArgs),
    /// Tear down the local resource of one network
    Delete(cmd::ApplyArgs),
    /// Show whether the local resource of a network is absent, created or configured
    Status(cmd::ApplyArgs),
    /// Attach a new member namespace to a network
    Join(cmd::JoinArgs),
    /// Remove a member namespace
    Leave(cmd::LeaveArgs),
    /// Print the addresses of an interface
    Addrs(cmd::AddrsArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries command results.
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start(args) => cmd::run_start(args).await,
        Command::Apply(args) => cmd::run_apply(args).await,
        Command::Delete(args) => cmd::run_delete(args).await,
        Command::Status(args) => cmd::run_status(args).await,
        Command::Join(args) => cmd::run_join(args).await,
        Command::Leave(args) => cmd::run_leave(args).await,
        Command::Addrs(args) => cmd::run_addrs(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
