//! # redbackup-harness
//!
//! Runs redbackup cluster scenarios against a local Docker daemon.
//!
//! ## Commands
//!
//! - `backup-restore`: back up and restore on a two-node cluster
//! - `replicated`: back up on one node, restore from the others
//! - `performance`: concurrent detached backups, timed per client
//!
//! ## Example
//!
//! ```bash
//! # Images redbackup/node:v0.3.1 and redbackup/client:v0.3.1 must exist
//! redbackup-harness --version-tag v0.3.1 backup-restore
//!
//! # Ten nodes, one client
//! redbackup-harness performance --clients 1 --nodes 10 --node-launch-delay 30
//! ```

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use redbackup_harness::payload::MIB;
use redbackup_harness::{
    backup_and_restore, concurrent_backup_performance, parse_expiration,
    replicated_backup_and_restore, DockerRuntime, HarnessConfig, PerformanceOptions, TestData,
    DEFAULT_EXPIRATION,
};

/// Runs redbackup cluster scenarios against Docker.
#[derive(Parser, Debug)]
#[command(name = "redbackup-harness")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Version under test; selects image tags and names the network
    #[arg(long, global = true, env = "REDBACKUP_VERSION", default_value = "latest")]
    version_tag: String,

    /// Backup expiration (YYYY-MM-DDTHH:MM)
    #[arg(long, global = true, default_value = DEFAULT_EXPIRATION)]
    expiration: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up, list and restore on a two-node cluster
    BackupRestore {
        /// Directory to back up (a small tree is generated if omitted)
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Back up on one node, then list and restore from the other two
    Replicated {
        /// Directory to back up (a small tree is generated if omitted)
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Run concurrent detached backups and report their durations
    Performance {
        /// Number of clients
        #[arg(long, default_value = "5")]
        clients: usize,

        /// Number of fully meshed nodes
        #[arg(long, default_value = "1")]
        nodes: usize,

        /// Maximum number of files per client
        #[arg(long, default_value = "10")]
        max_files: usize,

        /// Minimum file size in MiB
        #[arg(long, default_value = "1")]
        min_mib: u64,

        /// Maximum file size in MiB
        #[arg(long, default_value = "100")]
        max_mib: u64,

        /// Node launch delay in seconds, overriding the configuration
        #[arg(long)]
        node_launch_delay: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redbackup_harness=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    let expiration = parse_expiration(&cli.expiration)?;
    let runtime = Arc::new(DockerRuntime::connect().context("Failed to connect to Docker")?);
    info!(version = %cli.version_tag, "running scenario");

    match cli.command {
        Commands::BackupRestore { data } => {
            let data = test_data(data)?;
            backup_and_restore(runtime, &cli.version_tag, &config, data.path(), &expiration)
                .await?;
            println!("backup-restore passed");
        }
        Commands::Replicated { data } => {
            let data = test_data(data)?;
            replicated_backup_and_restore(
                runtime,
                &cli.version_tag,
                &config,
                data.path(),
                &expiration,
            )
            .await?;
            println!("replicated passed");
        }
        Commands::Performance {
            clients,
            nodes,
            max_files,
            min_mib,
            max_mib,
            node_launch_delay,
        } => {
            let options = PerformanceOptions {
                clients,
                nodes,
                max_files,
                file_size: file_size_range(min_mib, max_mib)?,
                launch_delay: node_launch_delay.map(Duration::from_secs),
                expiration,
            };
            let report =
                concurrent_backup_performance(runtime, &cli.version_tag, &config, &options)
                    .await?;
            print!("{}", report);
        }
    }

    Ok(())
}

/// Convert the `--min-mib`/`--max-mib` bounds to a byte range.
fn file_size_range(min_mib: u64, max_mib: u64) -> Result<RangeInclusive<u64>> {
    if min_mib > max_mib {
        anyhow::bail!("--min-mib must not exceed --max-mib");
    }
    let Some(max_bytes) = max_mib.checked_mul(MIB) else {
        anyhow::bail!("--max-mib {} is too large", max_mib);
    };
    Ok(min_mib * MIB..=max_bytes)
}

fn test_data(path: Option<PathBuf>) -> Result<TestData> {
    match path {
        Some(path) => {
            anyhow::ensure!(path.is_dir(), "{} is not a directory", path.display());
            Ok(TestData::existing(path))
        }
        None => TestData::generated().context("Failed to generate test data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn performance_defaults() {
        let cli = Cli::try_parse_from(["redbackup-harness", "performance"]).unwrap();
        match cli.command {
            Commands::Performance {
                clients,
                nodes,
                max_files,
                min_mib,
                max_mib,
                node_launch_delay,
            } => {
                assert_eq!((clients, nodes, max_files), (5, 1, 10));
                assert_eq!((min_mib, max_mib), (1, 100));
                assert_eq!(node_launch_delay, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.expiration, DEFAULT_EXPIRATION);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "redbackup-harness",
            "backup-restore",
            "--version-tag",
            "v0.3.1",
            "--data",
            "/tmp/redbackup-test-data",
        ])
        .unwrap();
        assert_eq!(cli.version_tag, "v0.3.1");
        assert!(matches!(
            cli.command,
            Commands::BackupRestore { data: Some(_) }
        ));
    }

    #[test]
    fn file_size_bounds_are_checked() {
        assert_eq!(file_size_range(1, 100).unwrap(), MIB..=100 * MIB);
        assert!(file_size_range(5, 1).is_err());
        assert!(file_size_range(1, u64::MAX).is_err());
        assert!(file_size_range(u64::MAX, u64::MAX).is_err());
    }

    #[test]
    fn test_data_rejects_missing_directory() {
        assert!(test_data(Some(PathBuf::from("/nonexistent/redbackup-test-data"))).is_err());
    }
}
