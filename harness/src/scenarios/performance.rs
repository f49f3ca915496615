//! Concurrent detached backups.
//!
//! All clients are prepared before any starts, and all are started before
//! any is waited for, so the measured runs overlap as much as possible and
//! data injection never counts towards a run's duration.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{conclude, start};
use crate::client::{Client, PreparedRun, RunningRun};
use crate::cluster::ClusterConfiguration;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::payload::{generate_random_files, MIB};
use crate::runtime::ContainerRuntime;

/// Launch delay for clusters of many nodes, which need longer until every
/// peer hostname resolves.
pub const MANY_NODES_LAUNCH_DELAY: Duration = Duration::from_secs(30);

/// Shape of a performance run.
#[derive(Debug, Clone)]
pub struct PerformanceOptions {
    /// Number of clients backing up concurrently.
    pub clients: usize,
    /// Number of fully meshed nodes.
    pub nodes: usize,
    /// Upper bound of files per client; each client draws `1..=max_files`.
    pub max_files: usize,
    /// Size range of each file, in bytes.
    pub file_size: RangeInclusive<u64>,
    /// Node launch delay, overriding the configured one.
    pub launch_delay: Option<Duration>,
    /// Expiration of every backup.
    pub expiration: NaiveDateTime,
}

impl PerformanceOptions {
    /// Five clients on one node, up to ten files of 1 to 100 MiB each.
    pub fn many_clients(expiration: NaiveDateTime) -> Self {
        Self {
            clients: 5,
            nodes: 1,
            max_files: 10,
            file_size: MIB..=100 * MIB,
            launch_delay: None,
            expiration,
        }
    }

    /// One client on ten nodes, with a longer launch delay.
    pub fn many_nodes(expiration: NaiveDateTime) -> Self {
        Self {
            clients: 1,
            nodes: 10,
            launch_delay: Some(MANY_NODES_LAUNCH_DELAY),
            ..Self::many_clients(expiration)
        }
    }
}

/// Timing of one client's backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    /// Client name.
    pub client: String,
    /// Node the backup went to.
    pub node: String,
    /// Payload size in bytes.
    pub bytes: u64,
    /// Run time recorded by the runtime.
    pub duration: chrono::Duration,
}

/// Per-client results of a performance run, in client order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceReport {
    /// One entry per client.
    pub runs: Vec<ClientReport>,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for run in &self.runs {
            writeln!(
                f,
                "{} -> {}: {:.1} MiB in {}.{:03}s",
                run.client,
                run.node,
                run.bytes as f64 / MIB as f64,
                run.duration.num_seconds(),
                run.duration.num_milliseconds() % 1000
            )?;
        }
        Ok(())
    }
}

struct Pending {
    node: String,
    bytes: u64,
    run: PreparedRun,
}

struct Started {
    node: String,
    bytes: u64,
    run: RunningRun,
}

/// Back up random payloads from every client concurrently, each to a
/// randomly chosen node, and time every run.
pub async fn concurrent_backup_performance(
    runtime: Arc<dyn ContainerRuntime>,
    version: &str,
    config: &HarnessConfig,
    options: &PerformanceOptions,
) -> Result<PerformanceReport> {
    let mut cluster = ClusterConfiguration::performance(
        runtime,
        version,
        config,
        options.clients,
        options.nodes,
    )
    .await?;
    if let Some(delay) = options.launch_delay {
        cluster.set_launch_delay(delay)?;
    }
    start(&mut cluster).await?;
    let outcome = run(&cluster, config, options).await;
    conclude(&mut cluster, outcome).await
}

async fn run(
    cluster: &ClusterConfiguration,
    config: &HarnessConfig,
    options: &PerformanceOptions,
) -> Result<PerformanceReport> {
    let pending = prepare_all(cluster, options).await?;
    let started = start_all(pending).await?;

    info!(clients = started.len(), "all clients started");
    let mut report = PerformanceReport::default();
    let mut first_error = None;
    for started in &started {
        match started.run.wait(config.timing.client_wait_timeout()).await {
            Ok(completed) => {
                info!(
                    client = %completed.client,
                    duration_ms = completed.duration.num_milliseconds(),
                    "client finished"
                );
                report.runs.push(ClientReport {
                    client: completed.client,
                    node: started.node.clone(),
                    bytes: started.bytes,
                    duration: completed.duration,
                });
            }
            Err(e) => {
                warn!(client = %started.run.client(), error = %e, "client failed");
                first_error.get_or_insert(e);
            }
        }
    }

    info!("cleaning up clients");
    for started in started {
        if let Err(e) = started.run.remove().await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(report), Err)
}

async fn prepare_all(
    cluster: &ClusterConfiguration,
    options: &PerformanceOptions,
) -> Result<Vec<Pending>> {
    let mut pending = Vec::with_capacity(cluster.clients().len());
    for client in cluster.clients() {
        match prepare(cluster, client, options).await {
            Ok(prepared) => pending.push(prepared),
            Err(e) => {
                discard_all(pending).await;
                return Err(e);
            }
        }
    }
    Ok(pending)
}

async fn prepare(
    cluster: &ClusterConfiguration,
    client: &Client,
    options: &PerformanceOptions,
) -> Result<Pending> {
    let (node, files) = {
        let mut rng = rand::thread_rng();
        let node = cluster
            .nodes()
            .choose(&mut rng)
            .ok_or_else(|| HarnessError::Topology("cluster has no nodes".into()))?;
        (node, rng.gen_range(1..=options.max_files.max(1)))
    };

    // injected before start, so the scratch copy can go right after
    let scratch = tempfile::tempdir()?;
    info!(
        client = %client.name(),
        dir = %scratch.path().display(),
        "generating random backup data"
    );
    let bytes = generate_random_files(scratch.path(), files, options.file_size.clone())?;
    info!(client = %client.name(), bytes, files, "backup size");

    let run = client
        .prepare_backup_detached(scratch.path(), &options.expiration, node)
        .await?;
    Ok(Pending {
        node: node.name().to_string(),
        bytes,
        run,
    })
}

async fn start_all(pending: Vec<Pending>) -> Result<Vec<Started>> {
    let mut started = Vec::with_capacity(pending.len());
    let mut pending = pending.into_iter();
    while let Some(Pending { node, bytes, run }) = pending.next() {
        debug!(client = %run.client(), "starting client container");
        match run.start().await {
            Ok(run) => started.push(Started { node, bytes, run }),
            Err(e) => {
                discard_all(pending.collect()).await;
                for started in started {
                    if let Err(remove_err) = started.run.remove().await {
                        warn!(error = %remove_err, "failed to remove client container");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(started)
}

async fn discard_all(pending: Vec<Pending>) {
    for pending in pending {
        if let Err(e) = pending.run.discard().await {
            warn!(error = %e, "failed to discard client container");
        }
    }
}
