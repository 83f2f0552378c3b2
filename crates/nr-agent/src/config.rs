use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

pub(crate) const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_STATE_DIR: &str = "/run/nr-agent";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identity of this node in the directory.
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Holds the agent lock file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Namespace holding the node's public address. WireGuard links are
    /// created there so their sockets bind to it.
    pub public_namespace: Option<String>,
    pub poll_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            public_namespace: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

/// Command line / environment values that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub node_id: Option<String>,
    pub directory_url: Option<String>,
}

/// Load an agent config from a YAML file, apply overrides and validate it.
///
/// Relative paths in the config are resolved against the config file's parent directory.
pub async fn load(path: &Path, overrides: Overrides) -> AgentResult<AgentConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AgentError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: AgentConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| AgentError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    config.apply(overrides);
    config.validate()?;
    Ok(config)
}

impl AgentConfig {
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        if self.state_dir.is_relative() {
            self.state_dir = config_dir.join(&self.state_dir);
        }
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(node_id) = overrides.node_id {
            self.node_id = node_id;
        }
        if let Some(url) = overrides.directory_url {
            self.directory.url = url;
        }
    }

    fn validate(&self) -> AgentResult<()> {
        if self.node_id.is_empty() {
            return Err(AgentError::Config(
                "node_id is required (set in config or via --node-id / NR_NODE_ID)".into(),
            ));
        }
        if self.directory.url.is_empty() {
            return Err(AgentError::Config(
                "directory.url is required (set in config or via --directory-url / NR_DIRECTORY_URL)"
                    .into(),
            ));
        }
        if self.network.poll_interval_secs == 0 {
            return Err(AgentError::Config(
                "network.poll_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.network.poll_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.timeout_secs)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("agent.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("agent.yaml");
        tokio::fs::write(&path, yaml).await.unwrap();
        path
    }

    #[tokio::test]
    async fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
node_id: node-a
directory:
  url: https://directory.example.com
  timeout_secs: 5
network:
  public_namespace: public
  poll_interval_secs: 30
state_dir: /var/run/custom
"#,
        )
        .await;

        let config = load(&path, Overrides::default()).await.unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.directory.url, "https://directory.example.com");
        assert_eq!(config.directory_timeout(), Duration::from_secs(5));
        assert_eq!(config.network.public_namespace.as_deref(), Some("public"));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.lock_path(), PathBuf::from("/var/run/custom/agent.lock"));
    }

    #[tokio::test]
    async fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
node_id: node-a
directory:
  url: http://127.0.0.1:8080
"#,
        )
        .await;

        let config = load(&path, Overrides::default()).await.unwrap();
        assert_eq!(config.directory.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(
            config.poll_interval(),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
    }

    #[tokio::test]
    async fn relative_state_dir_follows_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
node_id: node-a
directory:
  url: http://127.0.0.1:8080
state_dir: state
"#,
        )
        .await;

        let config = load(&path, Overrides::default()).await.unwrap();
        assert_eq!(config.state_dir, dir.path().join("state"));
    }

    #[tokio::test]
    async fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
node_id: node-a
directory:
  url: http://127.0.0.1:8080
"#,
        )
        .await;

        let overrides = Overrides {
            node_id: Some("node-b".into()),
            directory_url: Some("http://10.1.1.1".into()),
        };
        let config = load(&path, overrides).await.unwrap();
        assert_eq!(config.node_id, "node-b");
        assert_eq!(config.directory.url, "http://10.1.1.1");
    }

    #[tokio::test]
    async fn missing_node_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "directory:\n  url: http://127.0.0.1:8080\n").await;

        let err = load(&path, Overrides::default()).await.unwrap_err();
        assert!(err.to_string().contains("node_id is required"), "got: {err}");

        let overrides = Overrides {
            node_id: Some("node-a".into()),
            directory_url: None,
        };
        assert!(load(&path, overrides).await.is_ok());
    }

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "node_id: node-a\n").await;
        let err = load(&path, Overrides::default()).await.unwrap_err();
        assert!(err.to_string().contains("directory.url"), "got: {err}");
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
node_id: node-a
directory:
  url: http://127.0.0.1:8080
network:
  poll_interval_secs: 0
"#,
        )
        .await;
        assert!(load(&path, Overrides::default()).await.is_err());
    }

    #[tokio::test]
    async fn unreadable_file_is_config_error() {
        let err = load(Path::new("/nonexistent/agent.yaml"), Overrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)), "got: {err}");
    }

    #[tokio::test]
    async fn malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "node_id: [unterminated\n").await;
        let err = load(&path, Overrides::default()).await.unwrap_err();
        assert!(err.to_string().contains("parse"), "got: {err}");
    }
}
