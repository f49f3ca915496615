//! End-to-end scenarios.
//!
//! Each scenario owns the lifecycle of its cluster:
//!
//! | Scenario | Cluster | Checks |
//! |----------|---------|--------|
//! | [`backup_and_restore`] | minimal | list and restore on the holding node |
//! | [`replicated_backup_and_restore`] | medium | list and restore on the other nodes after replication |
//! | [`concurrent_backup_performance`] | performance | concurrent detached backups, timed per client |
//!
//! Nodes are always stopped and inspected. The cluster is only cleaned up
//! when the scenario and the node inspection both succeeded; otherwise it
//! stays in place for debugging.
//!
//! Scenarios that need a Docker daemon and prebuilt images are ignored by
//! default:
//!
//! ```text
//! REDBACKUP_VERSION=v0.3.1 cargo test -p redbackup-harness scenarios -- --ignored
//! ```

mod backup_restore;
mod performance;
mod replication;

pub use backup_restore::backup_and_restore;
pub use performance::{
    concurrent_backup_performance, ClientReport, PerformanceOptions, PerformanceReport,
};
pub use replication::replicated_backup_and_restore;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::backup::{normalized_expiration, Backup};
use crate::cluster::ClusterConfiguration;
use crate::error::{HarnessError, Result};
use crate::payload::generate_test_tree;

/// Directory tree a scenario backs up.
#[derive(Debug)]
pub struct TestData {
    path: PathBuf,
    _scratch: Option<TempDir>,
}

impl TestData {
    /// Use an existing directory.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _scratch: None,
        }
    }

    /// Generate a small tree in a scratch directory removed on drop.
    pub fn generated() -> Result<Self> {
        let scratch = tempfile::tempdir()?;
        let path = generate_test_tree(scratch.path())?;
        Ok(Self {
            path,
            _scratch: Some(scratch),
        })
    }

    /// Root of the tree.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Start the nodes, tearing everything down again if that fails.
async fn start(cluster: &mut ClusterConfiguration) -> Result<()> {
    if let Err(e) = cluster.start_nodes().await {
        error!(error = %e, "failed to start nodes");
        if let Err(cleanup) = cluster.emergency_clean_up().await {
            warn!(error = %cleanup, "emergency clean up failed");
        }
        return Err(e);
    }
    Ok(())
}

/// Stop the nodes and clean up if everything succeeded.
///
/// A scenario failure takes precedence over a node failure.
async fn conclude<T>(cluster: &mut ClusterConfiguration, outcome: Result<T>) -> Result<T> {
    let stopped = cluster.stop_nodes().await;
    match (outcome, stopped) {
        (Ok(value), Ok(())) => {
            cluster.clean_up().await?;
            Ok(value)
        }
        (Err(e), _) | (Ok(_), Err(e)) => {
            warn!(
                network = %cluster.network().name(),
                "leaving cluster in place for debugging"
            );
            Err(e)
        }
    }
}

/// Require exactly one backup, expiring at `expiration`.
fn expect_single_backup(
    backups: Vec<Backup>,
    node: &str,
    expiration: &NaiveDateTime,
) -> Result<Backup> {
    let expected = normalized_expiration(expiration);
    let mut backups = backups.into_iter();
    let backup = match (backups.next(), backups.next()) {
        (Some(backup), None) => backup,
        (None, _) => {
            return Err(HarnessError::Verification(format!(
                "{} lists no backup",
                node
            )))
        }
        (Some(_), Some(_)) => {
            return Err(HarnessError::Verification(format!(
                "{} lists {} backups, expected 1",
                node,
                2 + backups.count()
            )))
        }
    };

    if backup.expiration_date != expected {
        return Err(HarnessError::Verification(format!(
            "backup {} on {} expires {}, expected {}",
            backup.backup_id, node, backup.expiration_date, expected
        )));
    }
    info!(node = %node, backup = %backup.backup_id, "found backup");
    Ok(backup)
}

#[cfg(test)]
mod test_support {
    use std::path::Path;

    use crate::config::HarnessConfig;
    use crate::runtime::MockRuntime;

    pub const VERSION: &str = "v0.3.1";
    pub const LISTING: &str = "Backups:\nid1 2099-04-12 17:49:00 UTC\n";

    pub fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.timing.settle_delay_secs = 0;
        config.timing.replication_wait_secs = 0;
        config
    }

    pub fn runtime() -> MockRuntime {
        let runtime = MockRuntime::new();
        runtime.add_image("redbackup/node:v0.3.1");
        runtime.add_image("redbackup/client:v0.3.1");
        runtime
    }

    /// Serve `data` as what `client` restores.
    pub fn serve_restore(runtime: &MockRuntime, client: &str, data: &Path) {
        let name = data.file_name().unwrap().to_str().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_dir_all(format!("restore-dir/{}", name), data)
            .unwrap();
        runtime.set_archive(client, "/restore-dir", builder.into_inner().unwrap());
    }

    /// Docker version under test for ignored scenarios.
    pub fn docker_version() -> String {
        std::env::var("REDBACKUP_VERSION").unwrap_or_else(|_| "latest".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::parse_expiration;

    fn expiration() -> NaiveDateTime {
        parse_expiration("2099-04-12T17:49").unwrap()
    }

    #[test]
    fn single_backup_with_matching_expiration() {
        let backups = vec![Backup::new("id1", "2099-04-12 17:49:00 UTC")];
        let backup = expect_single_backup(backups, "NodeA", &expiration()).unwrap();
        assert_eq!(backup.backup_id, "id1");
    }

    #[test]
    fn backup_count_is_verified() {
        let err = expect_single_backup(vec![], "NodeB", &expiration()).unwrap_err();
        assert!(err.to_string().contains("NodeB lists no backup"));

        let backups = vec![
            Backup::new("id1", "2099-04-12 17:49:00 UTC"),
            Backup::new("id2", "2099-04-12 17:49:00 UTC"),
            Backup::new("id3", "2099-04-12 17:49:00 UTC"),
        ];
        let err = expect_single_backup(backups, "NodeA", &expiration()).unwrap_err();
        assert!(err.to_string().contains("lists 3 backups"));
    }

    #[test]
    fn expiration_is_verified() {
        let backups = vec![Backup::new("id1", "2099-04-12 17:50:00 UTC")];
        let err = expect_single_backup(backups, "NodeA", &expiration()).unwrap_err();
        assert!(matches!(err, HarnessError::Verification(_)));
    }

    #[test]
    fn generated_test_data_is_removed_on_drop() {
        let data = TestData::generated().unwrap();
        let path = data.path().to_path_buf();
        assert!(path.join("file_1").is_file());
        drop(data);
        assert!(!path.exists());
    }
}
