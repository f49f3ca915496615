//! Harness configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working configuration.
//!
//! The timing values are heuristic bounds standing in for readiness and
//! replication signals the nodes do not expose. They are not guarantees:
//! a slow host can outlast any of them.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the harness.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarnessConfig {
    /// Image names.
    #[serde(default)]
    pub images: ImageConfig,
    /// Paths of the redbackup binaries inside the images.
    #[serde(default)]
    pub binaries: BinaryConfig,
    /// Delays and timeouts.
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Image configuration. Tags are always the version under test.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Node image repository (default: `redbackup/node`).
    #[serde(default = "default_node_image")]
    pub node_image: String,
    /// Client image repository (default: `redbackup/client`).
    #[serde(default = "default_client_image")]
    pub client_image: String,
    /// Prefix of the per-cluster network name (default: `redbackup`).
    #[serde(default = "default_network_prefix")]
    pub network_prefix: String,
}

/// Locations of the external binaries inside their images.
#[derive(Debug, Clone, Deserialize)]
pub struct BinaryConfig {
    /// Node binary (default: `/usr/local/bin/redbackup-node`).
    #[serde(default = "default_node_binary")]
    pub node: String,
    /// Client binary (default: `/usr/local/bin/redbackup-client`).
    #[serde(default = "default_client_binary")]
    pub client: String,
}

/// Delays and timeouts, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Sleep embedded in each node's launch command so peer hostnames
    /// resolve before the binary starts (default: 5).
    #[serde(default = "default_node_launch_delay")]
    pub node_launch_delay_secs: u64,
    /// Wait after all nodes were started (default: 7).
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
    /// Wait for a backup to replicate to the other nodes (default: 35).
    /// Nodes replicate 5 chunks every 30 seconds.
    #[serde(default = "default_replication_wait")]
    pub replication_wait_secs: u64,
    /// Graceful stop timeout for nodes (default: 2).
    #[serde(default = "default_node_stop_timeout")]
    pub node_stop_timeout_secs: u64,
    /// Upper bound for a single client run (default: 180).
    #[serde(default = "default_client_wait_timeout")]
    pub client_wait_timeout_secs: u64,
}

impl TimingConfig {
    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Replication wait as a `Duration`.
    pub fn replication_wait(&self) -> Duration {
        Duration::from_secs(self.replication_wait_secs)
    }

    /// Node stop timeout as a `Duration`.
    pub fn node_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.node_stop_timeout_secs)
    }

    /// Client wait timeout as a `Duration`.
    pub fn client_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.client_wait_timeout_secs)
    }
}

fn default_node_image() -> String {
    "redbackup/node".to_string()
}

fn default_client_image() -> String {
    "redbackup/client".to_string()
}

fn default_network_prefix() -> String {
    "redbackup".to_string()
}

fn default_node_binary() -> String {
    "/usr/local/bin/redbackup-node".to_string()
}

fn default_client_binary() -> String {
    "/usr/local/bin/redbackup-client".to_string()
}

fn default_node_launch_delay() -> u64 {
    5
}

fn default_settle_delay() -> u64 {
    7
}

fn default_replication_wait() -> u64 {
    35
}

fn default_node_stop_timeout() -> u64 {
    2
}

fn default_client_wait_timeout() -> u64 {
    3 * 60
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            node_image: default_node_image(),
            client_image: default_client_image(),
            network_prefix: default_network_prefix(),
        }
    }
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            node: default_node_binary(),
            client: default_client_binary(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            node_launch_delay_secs: default_node_launch_delay(),
            settle_delay_secs: default_settle_delay(),
            replication_wait_secs: default_replication_wait(),
            node_stop_timeout_secs: default_node_stop_timeout(),
            client_wait_timeout_secs: default_client_wait_timeout(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Full node image reference for a version.
    pub fn node_image(&self, version: &str) -> String {
        format!("{}:{}", self.images.node_image, version)
    }

    /// Full client image reference for a version.
    pub fn client_image(&self, version: &str) -> String {
        format!("{}:{}", self.images.client_image, version)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_node_timing() {
        let config = HarnessConfig::default();
        assert_eq!(config.timing.node_launch_delay_secs, 5);
        assert_eq!(config.timing.replication_wait_secs, 35);
        assert_eq!(config.timing.node_stop_timeout_secs, 2);
        assert_eq!(config.timing.client_wait_timeout(), Duration::from_secs(180));
        assert!(config.timing.settle_delay_secs > config.timing.node_launch_delay_secs);
    }

    #[test]
    fn image_references_are_tagged_with_version() {
        let config = HarnessConfig::default();
        assert_eq!(config.node_image("v0.3.1"), "redbackup/node:v0.3.1");
        assert_eq!(config.client_image("v0.3.1"), "redbackup/client:v0.3.1");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[images]
node_image = "registry.local/node"
network_prefix = "ci"

[binaries]
client = "/opt/redbackup/client"

[timing]
node_launch_delay_secs = 30
replication_wait_secs = 60
"#;

        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.images.node_image, "registry.local/node");
        assert_eq!(config.images.client_image, "redbackup/client");
        assert_eq!(config.images.network_prefix, "ci");
        assert_eq!(config.binaries.client, "/opt/redbackup/client");
        assert_eq!(config.binaries.node, "/usr/local/bin/redbackup-node");
        assert_eq!(config.timing.node_launch_delay_secs, 30);
        assert_eq!(config.timing.replication_wait(), Duration::from_secs(60));
        assert_eq!(config.timing.settle_delay_secs, 7);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.images.node_image, "redbackup/node");
        assert_eq!(config.timing.client_wait_timeout_secs, 180);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = HarnessConfig::from_file(std::path::Path::new("/nonexistent/harness.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "[timing]\nsettle_delay_secs = \"soon\"\n").unwrap();

        let err = HarnessConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
