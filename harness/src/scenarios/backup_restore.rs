//! Backup and restore on a single node.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::info;

use super::{conclude, expect_single_backup, start};
use crate::cluster::ClusterConfiguration;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::runtime::ContainerRuntime;

/// Back up `data` from `client1` onto `NodeA` of a minimal cluster, list it
/// there and restore it.
///
/// The listing must hold exactly one backup with the normalized
/// `expiration`, and the restored tree must equal `data`.
pub async fn backup_and_restore(
    runtime: Arc<dyn ContainerRuntime>,
    version: &str,
    config: &HarnessConfig,
    data: &Path,
    expiration: &NaiveDateTime,
) -> Result<()> {
    let mut cluster = ClusterConfiguration::minimal(runtime, version, config).await?;
    start(&mut cluster).await?;
    let outcome = run(&mut cluster, data, expiration).await;
    conclude(&mut cluster, outcome).await
}

async fn run(
    cluster: &mut ClusterConfiguration,
    data: &Path,
    expiration: &NaiveDateTime,
) -> Result<()> {
    let (client, node) = cluster.client_and_node("client1", "NodeA")?;

    client.backup(data, expiration, node).await?;
    let backups = client.list_backups(node).await?;
    let backup = expect_single_backup(backups, node.name(), expiration)?;
    client.restore(&backup.backup_id, data, node).await?;

    info!(backup = %backup.backup_id, "backup restored from holding node");
    Ok(())
}
