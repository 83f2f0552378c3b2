mod network;
mod start;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use directory::HttpDirectory;
use netresource::{Networker, NetworkerConfig, SystemKernel};

use crate::config::{self, AgentConfig, Overrides};
use crate::error::AgentResult;

pub use network::{
    AddrsArgs, ApplyArgs, JoinArgs, LeaveArgs, run_addrs, run_apply, run_delete, run_join,
    run_leave, run_status,
};
pub use start::{StartArgs, run_start};

/// Config file location plus the values that may override it.
#[derive(Args)]
pub struct ConfigArgs {
    /// Path to agent.yaml config file
    #[arg(long, short)]
    config: PathBuf,
    /// Directory URL (overrides config)
    #[arg(long, env = "NR_DIRECTORY_URL")]
    directory_url: Option<String>,
    /// Identity of this node (overrides config)
    #[arg(long, env = "NR_NODE_ID")]
    node_id: Option<String>,
}

impl ConfigArgs {
    async fn load(self) -> AgentResult<AgentConfig> {
        let overrides = Overrides {
            node_id: self.node_id,
            directory_url: self.directory_url,
        };
        config::load(&self.config, overrides).await
    }
}

fn build_directory(config: &AgentConfig) -> AgentResult<HttpDirectory> {
    Ok(HttpDirectory::with_timeout(
        &config.directory.url,
        config.directory_timeout(),
    )?)
}

fn build_networker(config: &AgentConfig) -> Networker<SystemKernel> {
    Networker::new(
        Arc::new(SystemKernel::new()),
        NetworkerConfig {
            node_id: config.node_id.clone(),
            public_namespace: config.network.public_namespace.clone(),
        },
    )
}
