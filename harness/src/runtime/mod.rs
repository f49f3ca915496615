//! Container runtime abstraction.
//!
//! Node and client controllers talk to the runtime only through
//! [`ContainerRuntime`], so they can be driven against Docker
//! ([`DockerRuntime`]) or against an in-memory journal ([`MockRuntime`]).
//!
//! # Example
//!
//! ```ignore
//! let runtime = DockerRuntime::connect()?;
//! let network = runtime.create_network("redbackup_medium_v0.3.1").await?;
//! let unit = runtime.create(&spec).await?;
//! runtime.connect(&network, &unit).await?;
//! runtime.start(&unit).await?;
//! let exit_code = runtime.wait(&unit, Duration::from_secs(180)).await?;
//! ```

mod docker;
mod mock;

pub use docker::DockerRuntime;
pub use mock::{MockCall, MockRuntime};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Handle to an execution unit (container).
///
/// Owned by exactly one controller; never cloned across members.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct UnitHandle(String);

impl UnitHandle {
    /// Wrap a runtime identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Runtime identifier of the unit.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a virtual network shared read-only by all cluster members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle {
    name: String,
}

impl NetworkHandle {
    /// Wrap a network name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Network name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything needed to materialize a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Image reference (`repo:tag` or image id).
    pub image: String,
    /// Entrypoint argv.
    pub entrypoint: Vec<String>,
    /// Unit name; also used as hostname.
    pub name: String,
    /// Environment (`KEY=VALUE`).
    pub env: Vec<String>,
}

impl UnitSpec {
    /// Hostname the unit is reachable under on its network.
    pub fn hostname(&self) -> &str {
        &self.name
    }
}

/// Which output streams to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStreams {
    /// Include stdout.
    pub stdout: bool,
    /// Include stderr.
    pub stderr: bool,
}

impl LogStreams {
    /// Both streams, interleaved as the runtime recorded them.
    pub const ALL: Self = Self {
        stdout: true,
        stderr: true,
    };

    /// Stdout only.
    pub const STDOUT: Self = Self {
        stdout: true,
        stderr: false,
    };
}

/// Start and finish timestamps the runtime recorded for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimes {
    /// When the unit's process started.
    pub started_at: DateTime<FixedOffset>,
    /// When the unit's process exited.
    pub finished_at: DateTime<FixedOffset>,
}

impl RunTimes {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Container runtime operations used by the harness.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether an image reference exists locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Create a virtual network.
    async fn create_network(&self, name: &str) -> Result<NetworkHandle>;

    /// Attach a unit to a network.
    async fn connect(&self, network: &NetworkHandle, unit: &UnitHandle) -> Result<()>;

    /// Remove a network. All units on it must be removed first.
    async fn remove_network(&self, network: &NetworkHandle) -> Result<()>;

    /// Create (but do not start) a unit.
    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle>;

    /// Start a created unit.
    async fn start(&self, unit: &UnitHandle) -> Result<()>;

    /// Block until the unit exits and return its exit code.
    ///
    /// Exceeding `timeout` is an error, not a partial result.
    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<i64>;

    /// Stop a running unit, killing it after `timeout`.
    async fn stop(&self, unit: &UnitHandle, timeout: Duration) -> Result<()>;

    /// Remove a unit.
    async fn remove(&self, unit: &UnitHandle) -> Result<()>;

    /// Collect the unit's output so far.
    async fn logs(&self, unit: &UnitHandle, streams: LogStreams) -> Result<String>;

    /// Unpack a tar archive into the unit at `path`.
    async fn copy_in(&self, unit: &UnitHandle, path: &str, archive: Vec<u8>) -> Result<()>;

    /// Fetch `path` from the unit as a tar archive, buffered to completion.
    async fn copy_out(&self, unit: &UnitHandle, path: &str) -> Result<Vec<u8>>;

    /// Commit the unit's filesystem as `repo:tag` and return that reference.
    async fn commit(&self, unit: &UnitHandle, repo: &str, tag: &str) -> Result<String>;

    /// Start and finish timestamps of an exited unit.
    async fn run_times(&self, unit: &UnitHandle) -> Result<RunTimes>;
}

impl fmt::Debug for dyn ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContainerRuntime")
    }
}
