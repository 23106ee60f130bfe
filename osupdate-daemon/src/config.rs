//! Configuration management for the daemon.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use osupdate_common::advertise;
use osupdate_ipc::DEFAULT_SOCKET_PATH;

use crate::cli::Args;
use crate::quit_watch::DEFAULT_RETRY_INTERVAL;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/osupdate/daemon.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IPC socket configuration
    pub ipc: IpcConfig,
    /// Tree store backend configuration
    pub tree_store: TreeStoreConfig,
    /// Graceful shutdown via quit file
    pub quit_file: QuitFileConfig,
    /// Local network advertisement of the booted image
    pub advertise: AdvertiseConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Defaults with CLI overrides applied.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref socket) = args.socket {
            self.ipc.socket_path = socket.clone();
        }

        if let Some(ref quit_file) = args.quit_file {
            self.quit_file.path = Some(quit_file.clone());
        }

        if args.dev {
            self.tree_store.backend = TreeStoreBackend::Mock;
        }

        self
    }
}

/// IPC socket configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub socket_path: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
        }
    }
}

/// Tree store backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TreeStoreConfig {
    /// Backend type
    pub backend: TreeStoreBackend,
    /// `ostree` binary to run
    pub ostree_binary: String,
    /// Sysroot holding `ostree/repo` and the deployments
    pub sysroot: String,
    /// Stateroot to deploy into (the booted one if unset)
    pub os_name: Option<String>,
}

impl Default for TreeStoreConfig {
    fn default() -> Self {
        Self {
            backend: TreeStoreBackend::Ostree,
            ostree_binary: "ostree".to_string(),
            sysroot: "/".to_string(),
            os_name: None,
        }
    }
}

/// Tree store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeStoreBackend {
    /// In-memory store (development and tests)
    Mock,
    /// The `ostree` command-line tool
    Ostree,
}

/// Quit file configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuitFileConfig {
    /// File whose deletion asks the daemon to exit
    pub path: Option<String>,
    /// Seconds between checks while an operation is still running
    pub retry_secs: u64,
}

impl Default for QuitFileConfig {
    fn default() -> Self {
        Self {
            path: None,
            retry_secs: DEFAULT_RETRY_INTERVAL.as_secs(),
        }
    }
}

impl QuitFileConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs.max(1))
    }
}

/// Advertisement record configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvertiseConfig {
    /// Publish the booted image for peers on the local network
    pub enabled: bool,
    /// Directory the service file is written to
    pub directory: String,
    /// Repository path served to peers (derived from the remote URL if unset)
    pub ostree_path: Option<String>,
    /// Port peers connect to
    pub port: u16,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: advertise::DEFAULT_SERVICE_DIR.to_string(),
            ostree_path: None,
            port: advertise::DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ipc.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(config.tree_store.backend, TreeStoreBackend::Ostree);
        assert_eq!(config.quit_file.retry_interval(), Duration::from_secs(5));
        assert!(!config.advertise.enabled);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "tree_store:\n  backend: mock\nadvertise:\n  enabled: true\n  port: 8080\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.tree_store.backend, TreeStoreBackend::Mock);
        assert_eq!(config.tree_store.sysroot, "/");
        assert!(config.advertise.enabled);
        assert_eq!(config.advertise.port, 8080);
        assert_eq!(config.advertise.directory, advertise::DEFAULT_SERVICE_DIR);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/daemon.yaml").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args {
            socket: Some("/tmp/test.sock".to_string()),
            quit_file: Some("/tmp/quit".to_string()),
            dev: true,
            ..Default::default()
        };
        let config = Config::default_with_cli(&args);
        assert_eq!(config.ipc.socket_path, "/tmp/test.sock");
        assert_eq!(config.quit_file.path.as_deref(), Some("/tmp/quit"));
        assert_eq!(config.tree_store.backend, TreeStoreBackend::Mock);
    }
}
