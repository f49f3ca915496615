//! Client controller.
//!
//! A client does not run continuously. Every command gets its own
//! short-lived container, started from the client's current image:
//!
//! - synchronous runs ([`Client::backup`], [`Client::restore`],
//!   [`Client::list_backups`]) create, run, inspect and remove the
//!   container in one call, committing its final state first so the next
//!   run continues from it;
//! - detached backups ([`Client::prepare_backup_detached`]) only create the
//!   container and inject data. The caller starts it later through the
//!   returned [`PreparedRun`], which lets many clients start back-to-back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::backup::{expiration_arg, parse_listing, Backup};
use crate::error::{HarnessError, Result};
use crate::inspect::check_log_for_errors;
use crate::node::Node;
use crate::runtime::{ContainerRuntime, LogStreams, NetworkHandle, UnitHandle, UnitSpec};
use crate::tree::{base_name, compare_trees, extract_directory, inject_directory, ScratchTree};

/// Diagnostic environment for client units.
pub const CLIENT_ENV: [&str; 2] = ["RUST_BACKTRACE=1", "RUST_LOG=redbackup=debug"];

/// Directory restores are written to inside the unit.
pub const RESTORE_DIR: &str = "/restore-dir";

/// A single synchronous client run.
#[derive(Debug, Default)]
struct SyncRun<'a> {
    command: Vec<String>,
    env: Vec<String>,
    inject: Option<(&'a Path, &'a str)>,
    extract: Option<&'a str>,
    /// Keep stdout on its own for the caller to parse.
    capture_stdout: bool,
}

/// What a successful synchronous run left behind.
#[derive(Debug)]
struct SyncOutcome {
    stdout: Option<String>,
    extracted: Option<ScratchTree>,
}

/// A redbackup client driven through short-lived containers.
pub struct Client {
    name: String,
    image: String,
    state_repo: String,
    generation: u32,
    network: NetworkHandle,
    binary: String,
    wait_timeout: Duration,
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Client {
    /// Describe a client starting from `image`. Committed states are tagged
    /// into `<image repo>-state`.
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        network: NetworkHandle,
        binary: impl Into<String>,
        wait_timeout: Duration,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let name = name.into();
        let image = image.into();
        let repo = image.rsplit_once(':').map_or(image.as_str(), |(repo, _)| repo);
        let state_repo = format!("{}-state", repo);
        debug!(client = %name, "client initialized");
        Self {
            name,
            image,
            state_repo,
            generation: 0,
            network,
            binary: binary.into(),
            wait_timeout,
            runtime,
        }
    }

    /// Client name, also the name of its containers.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image the next run starts from.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Back up a local directory onto `node`, expiring at `expiration`.
    ///
    /// The directory is injected at `/<base name>` and backed up from there.
    pub async fn backup(
        &mut self,
        directory: &Path,
        expiration: &NaiveDateTime,
        node: &Node,
    ) -> Result<()> {
        let command = self.backup_command(directory, expiration, node)?;
        self.run_sync(SyncRun {
            command,
            env: client_env(),
            inject: Some((directory, "/")),
            ..Default::default()
        })
        .await?;

        info!(client = %self.name, node = %node.name(), "backup created");
        Ok(())
    }

    /// Restore `backup_id` from `node` and compare it with `expected_directory`.
    pub async fn restore(
        &mut self,
        backup_id: &str,
        expected_directory: &Path,
        node: &Node,
    ) -> Result<()> {
        let command = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(
                "mkdir {dir}; {bin} -h {node} restore {id} {dir}",
                dir = RESTORE_DIR,
                bin = self.binary,
                node = node.name(),
                id = backup_id,
            ),
        ];
        let outcome = self
            .run_sync(SyncRun {
                command,
                env: client_env(),
                extract: Some(RESTORE_DIR),
                ..Default::default()
            })
            .await?;

        let scratch = outcome.extracted.ok_or_else(|| {
            HarnessError::Runtime(format!("{} did not extract {}", self.name, RESTORE_DIR))
        })?;
        let restored = restored_path(&scratch, expected_directory)?;
        info!(
            restored = %restored.display(),
            expected = %expected_directory.display(),
            "comparing directory contents"
        );

        let diff = compare_trees(expected_directory, &restored)?;
        if !diff.is_empty() {
            return Err(HarnessError::TreeMismatch {
                expected: expected_directory.to_path_buf(),
                restored,
                diff,
            });
        }
        Ok(())
    }

    /// List the backups present on `node`, in the order the node reports them.
    pub async fn list_backups(&mut self, node: &Node) -> Result<Vec<Backup>> {
        let command = vec![
            self.binary.clone(),
            "-h".to_string(),
            node.name().to_string(),
            "list".to_string(),
        ];
        // no debug logging, so stdout holds nothing but the listing
        let outcome = self
            .run_sync(SyncRun {
                command,
                capture_stdout: true,
                ..Default::default()
            })
            .await?;

        parse_listing(outcome.stdout.as_deref().unwrap_or_default())
    }

    /// Create a backup container with `directory` injected, without starting it.
    pub async fn prepare_backup_detached(
        &self,
        directory: &Path,
        expiration: &NaiveDateTime,
        node: &Node,
    ) -> Result<PreparedRun> {
        let spec = UnitSpec {
            image: self.image.clone(),
            entrypoint: self.backup_command(directory, expiration, node)?,
            name: self.name.clone(),
            env: client_env(),
        };
        let unit = self.runtime.create(&spec).await?;

        let run = PreparedRun {
            client: self.name.clone(),
            unit,
            runtime: Arc::clone(&self.runtime),
        };
        let wired = async {
            self.runtime.connect(&self.network, &run.unit).await?;
            inject_directory(self.runtime.as_ref(), &run.unit, directory, "/").await
        }
        .await;

        match wired {
            Ok(()) => Ok(run),
            Err(e) => {
                // the unit never started; drop it before reporting
                if let Err(remove_err) = run.discard().await {
                    debug!(client = %self.name, error = %remove_err, "discard after failed prepare");
                }
                Err(e)
            }
        }
    }

    fn backup_command(
        &self,
        directory: &Path,
        expiration: &NaiveDateTime,
        node: &Node,
    ) -> Result<Vec<String>> {
        Ok(vec![
            self.binary.clone(),
            "-h".to_string(),
            node.name().to_string(),
            "create".to_string(),
            expiration_arg(expiration),
            format!("/{}", base_name(directory)?),
        ])
    }

    fn ensure_success(&self, exit_code: i64, output: &str) -> Result<()> {
        if exit_code != 0 {
            return Err(HarnessError::ExecFailed {
                unit: self.name.clone(),
                exit_code,
            });
        }
        check_log_for_errors(&self.name, output)
    }

    /// Run a command in a fresh container and remove it afterwards, even if
    /// a step in between failed. The first failure wins.
    async fn run_sync(&mut self, run: SyncRun<'_>) -> Result<SyncOutcome> {
        debug!(client = %self.name, command = ?run.command, "running command");
        let spec = UnitSpec {
            image: self.image.clone(),
            entrypoint: run.command.clone(),
            name: self.name.clone(),
            env: run.env.clone(),
        };
        let unit = self.runtime.create(&spec).await?;

        let result = self.drive(&unit, &run).await;
        let removed = self.runtime.remove(&unit).await;

        let outcome = result?;
        removed?;
        Ok(outcome)
    }

    async fn drive(&mut self, unit: &UnitHandle, run: &SyncRun<'_>) -> Result<SyncOutcome> {
        self.runtime.connect(&self.network, unit).await?;
        if let Some((local_dir, container_dir)) = run.inject {
            inject_directory(self.runtime.as_ref(), unit, local_dir, container_dir).await?;
        }

        debug!(client = %self.name, "starting client container");
        self.runtime.start(unit).await?;
        debug!(client = %self.name, "waiting for completion of client container");
        let exit_code = self.runtime.wait(unit, self.wait_timeout).await?;
        debug!(client = %self.name, exit_code, "client container has completed");

        let output = self.runtime.logs(unit, LogStreams::ALL).await?;
        let stdout = if run.capture_stdout {
            Some(self.runtime.logs(unit, LogStreams::STDOUT).await?)
        } else {
            None
        };

        self.generation += 1;
        let tag = format!("{}-{}", self.name, self.generation);
        self.image = self.runtime.commit(unit, &self.state_repo, &tag).await?;
        debug!(client = %self.name, image = %self.image, "committed client state");

        // a failed run leaves nothing worth extracting
        self.ensure_success(exit_code, &output)?;

        let extracted = match run.extract {
            Some(path) => Some(extract_directory(self.runtime.as_ref(), unit, path).await?),
            None => None,
        };

        Ok(SyncOutcome { stdout, extracted })
    }
}

fn client_env() -> Vec<String> {
    CLIENT_ENV.iter().map(|s| s.to_string()).collect()
}

/// Path of the restored copy of `expected` inside an extracted restore dir.
fn restored_path(scratch: &ScratchTree, expected: &Path) -> Result<PathBuf> {
    let restore_root = RESTORE_DIR.trim_start_matches('/');
    Ok(scratch.path().join(restore_root).join(base_name(expected)?))
}

/// A detached backup container, created and loaded but not started.
#[derive(Debug)]
#[must_use = "a prepared run must be started or discarded"]
pub struct PreparedRun {
    client: String,
    unit: UnitHandle,
    runtime: Arc<dyn ContainerRuntime>,
}

impl PreparedRun {
    /// Name of the client that prepared this run.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Start the container. If starting fails the container is removed.
    pub async fn start(self) -> Result<RunningRun> {
        debug!(client = %self.client, "starting client container");
        if let Err(e) = self.runtime.start(&self.unit).await {
            if let Err(remove_err) = self.runtime.remove(&self.unit).await {
                debug!(client = %self.client, error = %remove_err, "remove after failed start");
            }
            return Err(e);
        }
        Ok(RunningRun {
            client: self.client,
            unit: self.unit,
            runtime: self.runtime,
        })
    }

    /// Remove the container without ever starting it.
    pub async fn discard(self) -> Result<()> {
        self.runtime.remove(&self.unit).await
    }
}

/// A started detached container.
#[derive(Debug)]
#[must_use = "a running run must be removed"]
pub struct RunningRun {
    client: String,
    unit: UnitHandle,
    runtime: Arc<dyn ContainerRuntime>,
}

impl RunningRun {
    /// Name of the client that owns this run.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Wait for the container to exit, then check its logs and exit code.
    pub async fn wait(&self, timeout: Duration) -> Result<CompletedRun> {
        let exit_code = self.runtime.wait(&self.unit, timeout).await?;
        let output = self.runtime.logs(&self.unit, LogStreams::ALL).await?;
        check_log_for_errors(&self.client, &output)?;
        if exit_code != 0 {
            return Err(HarnessError::ExecFailed {
                unit: self.client.clone(),
                exit_code,
            });
        }

        let times = self.runtime.run_times(&self.unit).await?;
        Ok(CompletedRun {
            client: self.client.clone(),
            duration: times.duration(),
        })
    }

    /// Remove the container.
    pub async fn remove(self) -> Result<()> {
        self.runtime.remove(&self.unit).await
    }
}

/// Result of a successful detached run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    /// Client name.
    pub client: String,
    /// Time between container start and exit, as recorded by the runtime.
    pub duration: chrono::Duration,
}
