//! Backup on one node, restore from the others after replication.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::info;

use super::{conclude, expect_single_backup, start};
use crate::cluster::ClusterConfiguration;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::runtime::ContainerRuntime;

/// Where the replicated backup is checked: a fresh client per node.
const REPLICA_CHECKS: [(&str, &str); 2] = [("client2", "NodeB"), ("client3", "NodeC")];

/// Back up `data` from `client1` onto `NodeA` of a medium cluster, wait for
/// replication, then list and restore it from `NodeB` and `NodeC`.
///
/// Nodes replicate five chunks every 30 seconds, so `data` should stay
/// below five files for one replication wait to suffice.
pub async fn replicated_backup_and_restore(
    runtime: Arc<dyn ContainerRuntime>,
    version: &str,
    config: &HarnessConfig,
    data: &Path,
    expiration: &NaiveDateTime,
) -> Result<()> {
    let mut cluster = ClusterConfiguration::medium(runtime, version, config).await?;
    start(&mut cluster).await?;
    let outcome = run(&mut cluster, config, data, expiration).await;
    conclude(&mut cluster, outcome).await
}

async fn run(
    cluster: &mut ClusterConfiguration,
    config: &HarnessConfig,
    data: &Path,
    expiration: &NaiveDateTime,
) -> Result<()> {
    let (client, node) = cluster.client_and_node("client1", "NodeA")?;
    client.backup(data, expiration, node).await?;

    info!(
        secs = config.timing.replication_wait_secs,
        "waiting for replication"
    );
    tokio::time::sleep(config.timing.replication_wait()).await;

    for (client, node) in REPLICA_CHECKS {
        let (client, node) = cluster.client_and_node(client, node)?;
        let backups = client.list_backups(node).await?;
        let backup = expect_single_backup(backups, node.name(), expiration)?;
        client.restore(&backup.backup_id, data, node).await?;
        info!(node = %node.name(), backup = %backup.backup_id, "replica restored");
    }
    Ok(())
}
